//! Remote log levels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a remote log record. Higher values are more verbose.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum LogLevel {
    None = 0,
    Error = 1,
    #[default]
    Warn = 2,
    Info = 3,
    Verbose = 4,
    Debug = 5,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::None => "NONE",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Verbose => "VERBOSE",
            LogLevel::Debug => "DEBUG",
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn from_value(value: u8) -> LogLevel {
        match value {
            0 => LogLevel::None,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Verbose,
            _ => LogLevel::Debug,
        }
    }

    /// Whether a record at `level` passes when `self` is the threshold.
    /// `None` records never pass and a `None` threshold passes nothing.
    pub fn is_level_enabled(self, level: LogLevel) -> bool {
        level != LogLevel::None && level <= self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(LogLevel::None),
            "ERROR" => Ok(LogLevel::Error),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "VERBOSE" => Ok(LogLevel::Verbose),
            "DEBUG" => Ok(LogLevel::Debug),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold() {
        assert!(LogLevel::Warn.is_level_enabled(LogLevel::Error));
        assert!(LogLevel::Warn.is_level_enabled(LogLevel::Warn));
        assert!(!LogLevel::Warn.is_level_enabled(LogLevel::Info));
        assert!(!LogLevel::Debug.is_level_enabled(LogLevel::None));
        assert!(!LogLevel::None.is_level_enabled(LogLevel::Error));
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("Verbose".parse::<LogLevel>().unwrap(), LogLevel::Verbose);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_serde_uses_uppercase_names() {
        assert_eq!(serde_json::to_string(&LogLevel::Info).unwrap(), "\"INFO\"");
        let level: LogLevel = serde_json::from_str("\"ERROR\"").unwrap();
        assert_eq!(level, LogLevel::Error);
        assert_eq!(LogLevel::from_value(LogLevel::Verbose.value()), LogLevel::Verbose);
    }
}
