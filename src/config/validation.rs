//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges. All errors are
//! collected so a bad file is reported in one pass.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AgentConfig;

/// Smallest accepted log expiration period.
pub const MIN_EXPIRATION_SECS: u64 = 30;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a configuration, returning every error found.
pub fn validate_config(config: &AgentConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.task_queue.dequeue_period_ms == 0 {
        errors.push(ValidationError::new(
            "task_queue.dequeue_period_ms",
            "must be greater than zero",
        ));
    }

    if config.harvest.period_secs == 0 {
        errors.push(ValidationError::new(
            "harvest.period_secs",
            "must be greater than zero",
        ));
    }

    let logs = &config.log_reporting;
    if logs.payload_limit_bytes == 0 {
        errors.push(ValidationError::new(
            "log_reporting.payload_limit_bytes",
            "must be greater than zero",
        ));
    }
    if logs.min_payload_bytes < -1 {
        errors.push(ValidationError::new(
            "log_reporting.min_payload_bytes",
            "must be -1 (disabled) or a byte count",
        ));
    }
    if logs.expiration_period_secs < MIN_EXPIRATION_SECS {
        errors.push(ValidationError::new(
            "log_reporting.expiration_period_secs",
            format!("must be at least {} seconds", MIN_EXPIRATION_SECS),
        ));
    }
    if !(0.0..=100.0).contains(&logs.sample_rate) {
        errors.push(ValidationError::new(
            "log_reporting.sample_rate",
            "must be a percentage between 0 and 100",
        ));
    }
    if logs.enabled && logs.data_dir.as_os_str().is_empty() {
        errors.push(ValidationError::new(
            "log_reporting.data_dir",
            "is required when log reporting is enabled",
        ));
    }

    if config.transport.collector_host.trim().is_empty() {
        errors.push(ValidationError::new(
            "transport.collector_host",
            "must not be empty",
        ));
    }
    if config.transport.timeout_secs == 0 {
        errors.push(ValidationError::new(
            "transport.timeout_secs",
            "must be greater than zero",
        ));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
