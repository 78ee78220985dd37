//! Log upload transport.
//!
//! # Responsibilities
//! - POST rollup payloads to the collector's `/mobile/logs` endpoint
//! - Classify response codes into upload outcomes
//!
//! # Design Decisions
//! - The transport only reports what happened; the reporter decides whether
//!   the file is kept or soft-deleted
//! - Timeouts are applied by the client, not by the caller

use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use url::Url;

use crate::config::TransportConfig;

pub const LOGS_ENDPOINT_PATH: &str = "/mobile/logs";
pub const LICENSE_KEY_HEADER: &str = "X-App-License-Key";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid collector url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("upload timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(#[source] reqwest::Error),
}

/// What happened to an upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Accepted by the collector. The file can go.
    Delivered,
    /// The collector asked us to slow down (408/429). Retry next harvest.
    Throttled,
    /// Server error or no response. Retry next harvest.
    Failed,
    /// Permanent client error. Retrying will not help.
    Rejected,
}

impl UploadOutcome {
    pub fn from_status(status: u16) -> Self {
        match status {
            200 | 201 | 202 => UploadOutcome::Delivered,
            408 | 429 => UploadOutcome::Throttled,
            400..=499 => UploadOutcome::Rejected,
            _ => UploadOutcome::Failed,
        }
    }

    /// Whether the uploaded file should be soft-deleted.
    pub fn is_final(self) -> bool {
        matches!(self, UploadOutcome::Delivered | UploadOutcome::Rejected)
    }
}

/// Ships a serialized payload and returns the HTTP status.
pub trait LogTransport: Send + Sync {
    fn upload(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<u16, TransportError>>;
}

/// `reqwest` based transport to the collector.
pub struct LogForwarder {
    client: reqwest::Client,
    endpoint: Url,
    application_token: String,
}

impl LogForwarder {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let scheme = if config.use_ssl { "https" } else { "http" };
        let endpoint = Url::parse(&format!(
            "{scheme}://{}{LOGS_ENDPOINT_PATH}",
            config.collector_host
        ))?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            client,
            endpoint,
            application_token: config.application_token.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl LogTransport for LogForwarder {
    fn upload(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<u16, TransportError>> {
        async move {
            let response = self
                .client
                .post(self.endpoint.clone())
                .header(CONTENT_TYPE, "application/json")
                .header(LICENSE_KEY_HEADER, &self.application_token)
                .body(payload)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        TransportError::Timeout
                    } else {
                        TransportError::Connection(e)
                    }
                })?;
            Ok(response.status().as_u16())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(UploadOutcome::from_status(200), UploadOutcome::Delivered);
        assert_eq!(UploadOutcome::from_status(202), UploadOutcome::Delivered);
        assert_eq!(UploadOutcome::from_status(408), UploadOutcome::Throttled);
        assert_eq!(UploadOutcome::from_status(429), UploadOutcome::Throttled);
        assert_eq!(UploadOutcome::from_status(413), UploadOutcome::Rejected);
        assert_eq!(UploadOutcome::from_status(403), UploadOutcome::Rejected);
        assert_eq!(UploadOutcome::from_status(500), UploadOutcome::Failed);
        assert_eq!(UploadOutcome::from_status(503), UploadOutcome::Failed);
        assert!(UploadOutcome::Rejected.is_final());
        assert!(!UploadOutcome::Throttled.is_final());
    }

    #[test]
    fn test_endpoint_from_config() {
        let config = TransportConfig {
            collector_host: "127.0.0.1:8080".into(),
            use_ssl: false,
            ..TransportConfig::default()
        };
        let forwarder = LogForwarder::new(&config).unwrap();
        assert_eq!(forwarder.endpoint().as_str(), "http://127.0.0.1:8080/mobile/logs");

        let forwarder = LogForwarder::new(&TransportConfig::default()).unwrap();
        assert_eq!(forwarder.endpoint().scheme(), "https");
    }
}
