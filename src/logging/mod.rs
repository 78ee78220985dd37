//! Remote log reporting subsystem.
//!
//! # Data Flow
//! ```text
//! instrumentation: Logger::log / log_attributes / log_all
//!     → RemoteLogger (level + sampling filter, validation, LogRecord)
//!     → bounded writer pool (spawn_blocking, semaphore permits)
//!     → LogReporter::append_to_working_file (one JSON line, file lock)
//!         → budget exhausted: roll logdata.tmp → logdata<ms>.dat
//!
//! harvest tick:
//!     → RemoteLogger::on_harvest (flush pending writes)
//!     → LogReporter::on_harvest
//!         → roll working file
//!         → rollup: CLOSED files → logdata<ms>.rollup (JSON array)
//!         → LogForwarder: POST /mobile/logs
//!             2xx  → soft-delete (.bak)
//!             408/429/5xx → keep, retry next harvest
//!             other 4xx   → soft-delete, not retried
//!     → LogReporter::on_harvest_complete (retry rollups, expire)
//! ```
//!
//! # Design Decisions
//! - One explicit `LogReporting` per agent context, no process globals
//! - Upload transport is a trait so the store can be driven without a network
//! - Two-phase delete keeps a recovery window until the next cleanup

pub mod forwarder;
pub mod level;
pub mod logger;
pub mod record;
pub mod remote;
pub mod reporter;
pub mod reporting;
pub mod store;

pub use forwarder::{LogForwarder, LogTransport, TransportError, UploadOutcome};
pub use level::LogLevel;
pub use logger::Logger;
pub use record::{Attributes, CommonAttributes, LogRecord, MessageValidator, ThrowableInfo};
pub use remote::RemoteLogger;
pub use reporter::{LogReportError, LogReportResult, LogReporter};
pub use reporting::LogReporting;
pub use store::LogFileState;
