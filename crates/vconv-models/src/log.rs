//! Append-only audit log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::InvalidCode;

/// Severity of an audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for i16 {
    fn from(level: LogLevel) -> i16 {
        match level {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
        }
    }
}

impl TryFrom<i16> for LogLevel {
    type Error = InvalidCode;

    fn try_from(code: i16) -> Result<Self, InvalidCode> {
        match code {
            0 => Ok(LogLevel::Debug),
            1 => Ok(LogLevel::Info),
            2 => Ok(LogLevel::Warn),
            3 => Ok(LogLevel::Error),
            other => Err(InvalidCode::new("log_level", other)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One audit record, optionally attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    /// Internal task id; scan-level errors carry no task
    pub task_id: Option<i64>,
    pub log_time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_codes_round_trip() {
        for code in 0..=3 {
            let level = LogLevel::try_from(code).unwrap();
            assert_eq!(i16::from(level), code);
        }
        assert!(LogLevel::try_from(9).is_err());
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Error);
        assert!(LogLevel::Warn > LogLevel::Info);
    }
}
