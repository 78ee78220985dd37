//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → stats → harvest data → measurements
//!     → task queue (started) → log reporting (optional) → harvest listeners
//!
//! Shutdown (shutdown.rs):
//!     final harvest → harvester stop → trigger broadcast
//!     → task queue worker exits → log writers drained → measurements cleared
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → AgentContext::shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: harvest what is buffered before stopping producers
//! - Shutdown has timeout: log writes and background tasks are bounded

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{wait_for_signal, ShutdownSignal};
pub use startup::{AgentContext, StartupError};
