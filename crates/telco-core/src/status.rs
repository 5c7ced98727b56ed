//! Status messages handed from a pipeline run to the presentation layer.
//!
//! A run collects its messages into a plain `Vec<StatusMessage>` that travels
//! with the run's report; nothing here is shared between runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity category shown by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl StatusLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLevel::Info => "info",
            StatusLevel::Warn => "warn",
            StatusLevel::Error => "error",
            StatusLevel::Success => "success",
        }
    }
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
}

impl StatusMessage {
    pub fn new(level: StatusLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(StatusLevel::Info, text)
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self::new(StatusLevel::Warn, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(StatusLevel::Error, text)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(StatusLevel::Success, text)
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.text)
    }
}

/// The most recent message of the given level, mirroring how the dashboard
/// shows a single message per category.
pub fn latest(messages: &[StatusMessage], level: StatusLevel) -> Option<&StatusMessage> {
    messages.iter().rev().find(|m| m.level == level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let msg = StatusMessage::warn("Could not delete file a.csv");
        assert_eq!(msg.to_string(), "[warn] Could not delete file a.csv");
    }

    #[test]
    fn test_latest_picks_last_of_level() {
        let messages = vec![
            StatusMessage::info("Uploading files..."),
            StatusMessage::warn("first"),
            StatusMessage::info("Running ETL pipeline..."),
            StatusMessage::warn("second"),
        ];
        assert_eq!(latest(&messages, StatusLevel::Warn).unwrap().text, "second");
        assert_eq!(
            latest(&messages, StatusLevel::Info).unwrap().text,
            "Running ETL pipeline..."
        );
        assert!(latest(&messages, StatusLevel::Error).is_none());
    }

    #[test]
    fn test_level_serializes_lowercase() {
        let json = serde_json::to_string(&StatusLevel::Success).unwrap();
        assert_eq!(json, "\"success\"");
    }
}
