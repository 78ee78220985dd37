//! Remote log records: shape, reserved attributes and validation.
//!
//! # Record Shape
//! One JSON object per line in the log store:
//! ```text
//! {"timestamp": 1700000000000, "level": "WARN", "message": "...",
//!  "error.message": "...", "error.stack": "...", "error.class": "...",
//!  "entity.guid": "...", "session.id": "...", "instrumentation.provider": "mobile",
//!  "instrumentation.name": "rust", "instrumentation.version": "0.1.0",
//!  "collector.name": "telemetry-agent", "attributes": {...}}
//! ```
//!
//! # Design Decisions
//! - User attributes are nested under `attributes` so they can never shadow
//!   a reserved key
//! - Truncation counts chars, never splitting a UTF-8 sequence

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::logging::level::LogLevel;
use crate::measurement::types::now_millis;

pub type Attributes = serde_json::Map<String, Value>;

pub const LEVEL_ATTRIBUTE: &str = "level";
pub const MESSAGE_ATTRIBUTE: &str = "message";

pub const MAX_ATTRIBUTES_PER_EVENT: usize = 255;
pub const MAX_ATTRIBUTE_NAME_SIZE: usize = 255;
pub const MAX_ATTRIBUTE_VALUE_SIZE: usize = 4096;
pub const MAX_MESSAGE_SIZE: usize = 4096;

pub const INSTRUMENTATION_PROVIDER: &str = "mobile";
pub const INSTRUMENTATION_NAME: &str = "rust";
pub const COLLECTOR_NAME: &str = "telemetry-agent";

/// Reserved attributes stamped on every record of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonAttributes {
    #[serde(rename = "entity.guid")]
    pub entity_guid: String,
    #[serde(rename = "session.id")]
    pub session_id: String,
    #[serde(rename = "instrumentation.provider")]
    pub instrumentation_provider: String,
    #[serde(rename = "instrumentation.name")]
    pub instrumentation_name: String,
    #[serde(rename = "instrumentation.version")]
    pub instrumentation_version: String,
    #[serde(rename = "collector.name")]
    pub collector_name: String,
}

impl CommonAttributes {
    pub fn new(entity_guid: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            entity_guid: entity_guid.into(),
            session_id: session_id.into(),
            instrumentation_provider: INSTRUMENTATION_PROVIDER.to_string(),
            instrumentation_name: INSTRUMENTATION_NAME.to_string(),
            instrumentation_version: env!("CARGO_PKG_VERSION").to_string(),
            collector_name: COLLECTOR_NAME.to_string(),
        }
    }
}

/// Error details attached to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrowableInfo {
    pub class: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ThrowableInfo {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Capture an error: its type name as the class, its display text as the
    /// message and its source chain as the stack.
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        let class = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("Error")
            .to_string();

        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            class,
            message: error.to_string(),
            stack: (!causes.is_empty()).then(|| causes.join("\ncaused by: ")),
        }
    }
}

/// A single structured log record as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: u64,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        rename = "error.message",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
    #[serde(rename = "error.stack", default, skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(rename = "error.class", default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
    #[serde(flatten)]
    pub common: CommonAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl LogRecord {
    /// Build a record stamped with the current time. Returns `None` when
    /// there is nothing worth recording.
    pub fn new(
        level: LogLevel,
        message: Option<String>,
        throwable: Option<ThrowableInfo>,
        attributes: Option<Attributes>,
        common: &CommonAttributes,
    ) -> Option<Self> {
        let message = message.filter(|m| !m.is_empty());
        let attributes = attributes.filter(|a| !a.is_empty());
        if message.is_none() && throwable.is_none() && attributes.is_none() {
            return None;
        }

        let (error_message, error_stack, error_class) = match throwable {
            Some(t) => (Some(t.message), t.stack, Some(t.class)),
            None => (None, None, None),
        };

        Some(Self {
            timestamp: now_millis(),
            level,
            message,
            error_message,
            error_stack,
            error_class,
            common: common.clone(),
            attributes,
        })
    }
}

/// Enforces the size limits of the log ingest endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageValidator {
    pub max_attributes: usize,
    pub max_name_size: usize,
    pub max_value_size: usize,
    pub max_message_size: usize,
}

impl Default for MessageValidator {
    fn default() -> Self {
        Self {
            max_attributes: MAX_ATTRIBUTES_PER_EVENT,
            max_name_size: MAX_ATTRIBUTE_NAME_SIZE,
            max_value_size: MAX_ATTRIBUTE_VALUE_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl MessageValidator {
    pub fn validate_message(&self, message: &str) -> String {
        truncate_chars(message, self.max_message_size)
    }

    pub fn validate_throwable(&self, throwable: ThrowableInfo) -> ThrowableInfo {
        ThrowableInfo {
            class: truncate_chars(&throwable.class, self.max_name_size),
            message: truncate_chars(&throwable.message, self.max_message_size),
            stack: throwable
                .stack
                .map(|s| truncate_chars(&s, self.max_value_size)),
        }
    }

    /// Drop attributes with empty or oversized names, cap the attribute
    /// count and truncate string values.
    pub fn validate_attributes(&self, attributes: Attributes) -> Attributes {
        let mut validated = Attributes::new();
        for (name, value) in attributes {
            if validated.len() >= self.max_attributes {
                tracing::debug!(limit = self.max_attributes, "Attribute limit reached, dropping the rest");
                break;
            }
            if name.is_empty() || name.chars().count() > self.max_name_size {
                tracing::debug!(name = %name, "Dropping attribute with invalid name");
                continue;
            }
            let value = match value {
                Value::String(s) => Value::String(truncate_chars(&s, self.max_value_size)),
                other => other,
            };
            validated.insert(name, value);
        }
        validated
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}
