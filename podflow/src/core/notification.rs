//! Client-facing progress notifications.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The three notification kinds of the client protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    /// Intermediate progress.
    Progress,
    /// Terminal success (possibly with warnings).
    Success,
    /// Terminal failure.
    Error,
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progress => write!(f, "progress"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// An ordered, timestamped message delivered to the client.
///
/// Sequence numbers are assigned by the progress channel at delivery time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressNotification {
    /// Delivery order within the run, starting at 1.
    pub sequence: u64,
    /// When the notification was produced (ISO 8601).
    pub timestamp: String,
    /// The notification kind.
    pub category: NotificationCategory,
    /// Machine-readable status (e.g. "persisting", "format_fallback").
    pub status: String,
    /// Human-readable message.
    pub message: String,
    /// Completion estimate, 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    /// Summary fields merged into the client payload.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ProgressNotification {
    fn build(category: NotificationCategory, status: &str, message: String, percent: Option<u8>) -> Self {
        Self {
            sequence: 0,
            timestamp: crate::utils::iso_timestamp(),
            category,
            status: status.to_string(),
            message,
            percent: percent.map(|p| p.min(100)),
            details: serde_json::Map::new(),
        }
    }

    /// Creates a progress notification.
    #[must_use]
    pub fn progress(status: &str, message: impl Into<String>, percent: u8) -> Self {
        Self::build(NotificationCategory::Progress, status, message.into(), Some(percent))
    }

    /// Creates a terminal success notification.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self::build(NotificationCategory::Success, "completed", message.into(), Some(100))
    }

    /// Creates a terminal error notification.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::build(NotificationCategory::Error, "failed", message.into(), None)
    }

    /// Adds a summary field.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Returns true for success and error notifications.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self.category, NotificationCategory::Progress)
    }

    /// Returns the flat JSON payload sent to the client.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("sequence".to_string(), serde_json::json!(self.sequence));
        map.insert("timestamp".to_string(), serde_json::json!(self.timestamp));
        map.insert("status".to_string(), serde_json::json!(self.status));
        map.insert("message".to_string(), serde_json::json!(self.message));
        if let Some(percent) = self.percent {
            map.insert("percent".to_string(), serde_json::json!(percent));
        }
        for (key, value) in &self.details {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        serde_json::Value::Object(map)
    }

    /// Encodes the notification as one blank-line-terminated text frame.
    #[must_use]
    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.category, self.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_progress_clamps_percent() {
        let n = ProgressNotification::progress("x", "msg", 150);
        assert_eq!(n.percent, Some(100));
        assert!(!n.is_terminal());
    }

    #[test]
    fn test_terminal_categories() {
        assert!(ProgressNotification::success("ok").is_terminal());
        assert!(ProgressNotification::error("bad").is_terminal());
    }

    #[test]
    fn test_frame_encoding() {
        let n = ProgressNotification::error("quota exceeded").with_detail("stage", json!("invoke_workflow"));
        let frame = n.to_frame();

        assert!(frame.starts_with("event: error\ndata: {"));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains("quota exceeded"));
        assert!(frame.contains("\"stage\":\"invoke_workflow\""));
    }

    #[test]
    fn test_details_never_override_core_fields() {
        let n = ProgressNotification::success("done").with_detail("message", json!("shadow"));
        assert_eq!(n.payload()["message"], json!("done"));
    }
}
