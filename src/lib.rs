//! In-process telemetry agent library.

pub mod config;
pub mod dispatch;
pub mod harvest;
pub mod lifecycle;
pub mod logging;
pub mod measurement;
pub mod observability;

pub use config::schema::AgentConfig;
pub use lifecycle::{AgentContext, Shutdown};
pub use logging::{LogLevel, Logger};
pub use measurement::Measurements;
