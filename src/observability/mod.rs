//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured diagnostic events via tracing)
//!     → metrics.rs (supportability counters and samples)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → SupportabilityStats snapshot (tests, CLI)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Agent diagnostics are separate from the remote log pipeline
//! - Metrics are cheap (sharded map update plus facade call)
//! - Exporter is off by default

pub mod logging;
pub mod metrics;

pub use self::logging::init_tracing;
pub use self::metrics::SupportabilityStats;
