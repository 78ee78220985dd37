//! Measurement aggregation subsystem.
//!
//! # Data Flow
//! ```text
//! instrumentation
//!     → Measurements facade (produce_*, add_*)
//!     → typed producers (buffer)
//!     → MeasurementEngine root pool: broadcast_measurements()
//!         → drains every producer once
//!         → one batch per consumer, filtered by type
//!             → metric consumers (MetricStore) ──┐
//!             → HttpTransactionHarvester ────────┼→ HarvestSink
//!             → activity pools (child MeasurementPool)
//! ```
//!
//! # Design Decisions
//! - Registries are snapshotted before delivery (no iterate-while-mutate)
//! - Activity pools attach off the calling thread; attachment is observable
//! - Measurements are shared as `Arc<Measurement>`, never cloned on fan-out

pub mod activity;
pub mod consumer;
pub mod engine;
pub mod facade;
pub mod metric;
pub mod pool;
pub mod producer;
pub mod types;

pub use activity::{Attachment, MeasuredActivity};
pub use consumer::{HttpTransactionHarvester, MetricFlavor, MetricMeasurementConsumer};
pub use engine::MeasurementEngine;
pub use facade::Measurements;
pub use metric::{Metric, MetricStore};
pub use pool::{MeasurementConsumer, MeasurementPool, MeasurementProducer};
pub use producer::BufferedProducer;
pub use types::{
    ActivityTrace, HttpTransaction, Measurement, MeasurementDetail, MeasurementError,
    MeasurementResult, MeasurementType, MetricUnit, ThreadInfo, Trace,
};
