//! Harvest subsystem.
//!
//! # Data Flow
//! ```text
//! Harvester::run (every harvest.period_secs)
//!     → on_harvest_before  (TaskQueue drains synchronously)
//!     → on_harvest         (metric consumers push into HarvestData,
//!                           LogReporter rolls, merges and uploads)
//!     → on_harvest_complete (per-cycle state reset, upload retries)
//!
//! Dispatch / consumers:
//!     → HarvestSink (HarvestData)
//!     → AgentHealth (exceptions the agent hit itself)
//! ```
//!
//! # Design Decisions
//! - Listeners are awaited one at a time, in registration order
//! - Sinks enforce per-cycle limits and report rejections as errors
//! - Shipping harvest payloads is out of scope; HarvestData is the boundary

pub mod data;
pub mod harvester;
pub mod health;
pub mod lifecycle;

pub use data::{HarvestData, HarvestError, HarvestLimits, HarvestResult, HarvestSink, HarvestSnapshot};
pub use harvester::Harvester;
pub use health::{AgentHealth, AgentHealthException};
pub use lifecycle::HarvestLifecycleAware;
