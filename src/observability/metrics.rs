//! Supportability metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the supportability metric names the agent reports about itself
//! - Aggregate them per agent context so callers can inspect them
//! - Mirror every update to the `metrics` facade for Prometheus exposition
//!
//! # Metrics
//! - `Supportability/Mobile/Logs/Init` (counter): log reporting started
//! - `Supportability/Mobile/Logs/Expired` (counter): files soft-deleted by age
//! - `Supportability/Mobile/Logs/Upload/Time` (sample): upload latency in ms
//! - `Supportability/Mobile/Logs/Upload/Size/Uncompressed` (sample): payload bytes
//! - `Supportability/Mobile/Logs/Upload/{Timeout,Throttled,Rejected,Failed}` (counter)
//! - `Supportability/Mobile/Logs/Dropped` (counter): records lost after retry
//! - `Supportability/AgentHealth/<kind>` (counter): health exceptions by kind
//! - `Supportability/TaskQueue/Dequeued` (counter): items dispatched by drains
//!
//! # Design Decisions
//! - Stats are scoped to an agent context, not process-global, so tests
//!   running side by side do not see each other's counts
//! - Updates are lock-free per name (DashMap shard + plain struct)

use std::collections::BTreeMap;
use std::net::SocketAddr;

use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusBuilder;

pub const LOGS_INIT: &str = "Supportability/Mobile/Logs/Init";
pub const LOGS_EXPIRED: &str = "Supportability/Mobile/Logs/Expired";
pub const LOGS_DROPPED: &str = "Supportability/Mobile/Logs/Dropped";
pub const LOGS_UPLOAD_TIME: &str = "Supportability/Mobile/Logs/Upload/Time";
pub const LOGS_UPLOAD_SIZE: &str = "Supportability/Mobile/Logs/Upload/Size/Uncompressed";
pub const LOGS_UPLOAD_TIMEOUT: &str = "Supportability/Mobile/Logs/Upload/Timeout";
pub const LOGS_UPLOAD_THROTTLED: &str = "Supportability/Mobile/Logs/Upload/Throttled";
pub const LOGS_UPLOAD_REJECTED: &str = "Supportability/Mobile/Logs/Upload/Rejected";
pub const LOGS_UPLOAD_FAILED: &str = "Supportability/Mobile/Logs/Upload/Failed";
pub const AGENT_HEALTH_PREFIX: &str = "Supportability/AgentHealth/";
pub const TASK_QUEUE_DEQUEUED: &str = "Supportability/TaskQueue/Dequeued";

/// Running aggregate for a single supportability metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatSample {
    pub count: u64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
}

impl StatSample {
    fn first(value: f64) -> Self {
        Self {
            count: 1,
            total: value,
            min: value,
            max: value,
        }
    }

    fn record(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Per-context supportability statistics.
#[derive(Debug, Default)]
pub struct SupportabilityStats {
    stats: DashMap<String, StatSample>,
}

impl SupportabilityStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn inc(&self, name: &str) {
        self.inc_by(name, 1);
    }

    /// Increment a counter by `n`.
    pub fn inc_by(&self, name: &str, n: u64) {
        self.stats
            .entry(name.to_owned())
            .and_modify(|s| {
                s.count += n;
                s.total += n as f64;
            })
            .or_insert(StatSample {
                count: n,
                total: n as f64,
                min: n as f64,
                max: n as f64,
            });
        metrics::counter!(name.to_owned()).increment(n);
    }

    /// Record a value sample (timings, sizes).
    pub fn sample(&self, name: &str, value: f64) {
        self.stats
            .entry(name.to_owned())
            .and_modify(|s| s.record(value))
            .or_insert_with(|| StatSample::first(value));
        metrics::histogram!(name.to_owned()).record(value);
    }

    /// Current aggregate for `name`, if anything was recorded.
    pub fn get(&self, name: &str) -> Option<StatSample> {
        self.stats.get(name).map(|s| *s)
    }

    /// Count for `name`, zero when never recorded.
    pub fn count(&self, name: &str) -> u64 {
        self.get(name).map(|s| s.count).unwrap_or(0)
    }

    /// Point-in-time copy of every recorded metric, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, StatSample> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn clear(&self) {
        self.stats.clear();
    }
}

/// Install the Prometheus exporter serving `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}
