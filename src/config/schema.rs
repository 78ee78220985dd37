//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the agent.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;

/// Root configuration for the telemetry agent.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Measurement engine settings.
    pub measurement: MeasurementConfig,

    /// Task queue drain schedule.
    pub task_queue: TaskQueueConfig,

    /// Harvest cycle settings.
    pub harvest: HarvestConfig,

    /// Remote log reporting (local store, rotation, upload).
    pub log_reporting: LogReportingConfig,

    /// Log upload transport.
    pub transport: TransportConfig,

    /// Agent diagnostics and supportability metrics.
    pub observability: ObservabilityConfig,
}

/// Measurement engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Accept new measurements. When false the production API is a no-op.
    pub enabled: bool,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Task queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TaskQueueConfig {
    /// Period of the background drain in milliseconds.
    pub dequeue_period_ms: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            dequeue_period_ms: 1000,
        }
    }
}

/// Harvest cycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HarvestConfig {
    /// Interval between harvest ticks in seconds.
    pub period_secs: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self { period_secs: 60 }
    }
}

/// Remote log reporting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LogReportingConfig {
    /// Enable remote log reporting.
    pub enabled: bool,

    /// Most verbose level forwarded to the log store.
    pub level: LogLevel,

    /// Root directory; log data lives in its `logreporting` subdirectory.
    pub data_dir: PathBuf,

    /// Upload payload budget in bytes.
    pub payload_limit_bytes: u64,

    /// Minimum closed-file total before a rollup is built (-1 disables).
    pub min_payload_bytes: i64,

    /// Age in seconds after which any log data file is expired.
    pub expiration_period_secs: u64,

    /// Percentage of sessions that report logs (0.0 - 100.0).
    pub sample_rate: f64,

    /// Entity GUID stamped on every record.
    pub entity_guid: String,

    /// Writer pool size. Zero sizes the pool from available parallelism.
    pub worker_threads: usize,

    /// Upper bound for draining in-flight writes on shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for LogReportingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: LogLevel::Warn,
            data_dir: std::env::temp_dir(),
            payload_limit_bytes: 1024 * 1000,
            min_payload_bytes: -1,
            expiration_period_secs: 2 * 24 * 60 * 60,
            sample_rate: 100.0,
            entity_guid: String::new(),
            worker_threads: 0,
            shutdown_timeout_ms: 3000,
        }
    }
}

/// Log upload transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Collector host (and optional port).
    pub collector_host: String,

    /// Use https.
    pub use_ssl: bool,

    /// Application token sent with every upload.
    pub application_token: String,

    /// Connect and request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            collector_host: "mobile-collector.newrelic.com".to_string(),
            use_ssl: true,
            application_token: String::new(),
            timeout_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit agent diagnostics as JSON lines.
    pub json_logs: bool,

    /// Enable the Prometheus endpoint for supportability metrics.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
        }
    }
}
