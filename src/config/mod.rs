//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AgentConfig (validated, immutable)
//!     → shared via ArcSwap in the AgentContext
//!
//! On file change:
//!     watcher.rs (parent dir watch, unchanged saves skipped)
//!     → loader.rs + validation.rs
//!     → AgentContext::reload_config swaps the Arc<AgentConfig>
//!     → Harvester::configuration_changed fans out to listeners
//! ```
//!
//! # Design Decisions
//! - A reload replaces the whole `AgentConfig`; listeners never see a partial update
//! - Every section has defaults, so an empty file is a valid config
//! - An invalid reload is logged and dropped; the agent keeps running on the old one

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AgentConfig, HarvestConfig, LogReportingConfig, MeasurementConfig, ObservabilityConfig,
    TaskQueueConfig, TransportConfig,
};
