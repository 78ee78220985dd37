//! The `Logger` handle instrumentation code logs through.

use std::fmt;
use std::sync::Arc;

use crate::logging::level::LogLevel;
use crate::logging::record::{Attributes, ThrowableInfo};
use crate::logging::remote::RemoteLogger;

/// Remote logging capability. Before log reporting starts (or when it is
/// disabled) the handle is `Uninitialized` and every call is accepted and
/// ignored.
#[derive(Clone, Default)]
pub enum Logger {
    #[default]
    Uninitialized,
    Remote(Arc<RemoteLogger>),
}

impl Logger {
    pub fn is_initialized(&self) -> bool {
        matches!(self, Logger::Remote(_))
    }

    pub fn is_level_enabled(&self, level: LogLevel) -> bool {
        match self {
            Logger::Uninitialized => false,
            Logger::Remote(remote) => remote.is_level_enabled(level),
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if let Logger::Remote(remote) = self {
            remote.log(level, message);
        }
    }

    pub fn log_throwable(&self, level: LogLevel, message: &str, throwable: ThrowableInfo) {
        if let Logger::Remote(remote) = self {
            remote.log_throwable(level, message, throwable);
        }
    }

    pub fn log_attributes(&self, attributes: Attributes) {
        if let Logger::Remote(remote) = self {
            remote.log_attributes(attributes);
        }
    }

    pub fn log_all(&self, throwable: Option<ThrowableInfo>, attributes: Attributes) {
        if let Logger::Remote(remote) = self {
            remote.log_all(throwable, attributes);
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn verbose(&self, message: &str) {
        self.log(LogLevel::Verbose, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Logger::Uninitialized => f.write_str("Logger::Uninitialized"),
            Logger::Remote(remote) => f
                .debug_struct("Logger::Remote")
                .field("level", &remote.level())
                .field("pending", &remote.pending_requests())
                .finish(),
        }
    }
}
