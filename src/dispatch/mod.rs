//! Asynchronous dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! any thread: TaskQueue::enqueue(task)
//!     → unbounded mpsc (never blocks)
//!     → worker task, on: 1s ticker | background_dequeue | synchronous_dequeue
//!         → broadcast suspended
//!         → QueuedTask::dispatch (exhaustive match)
//!             Trace            → Measurements::add_traced_method
//!             HttpTransaction  → Measurements::add_http_transaction
//!             Metric           → HarvestSink::add_metric
//!             ActivityTrace    → HarvestSink::add_activity_trace
//!             HealthException  → HarvestSink::add_health_exception
//!         → one broadcast, broadcasting resumed
//! ```
//!
//! # Design Decisions
//! - Tagged enum instead of runtime type checks
//! - Harvest flushes the queue synchronously before gathering data

pub mod queue;
pub mod task;

pub use queue::{TaskQueue, DEQUEUE_PERIOD};
pub use task::{DispatchError, DispatchResult, QueuedTask};
