//! Generated artifacts and per-item outcome accounting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Upload state of one batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Not attempted yet.
    #[default]
    Pending,
    /// Stored; a public reference is available.
    Uploaded,
    /// The upload attempt failed.
    Failed,
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Uploaded => write!(f, "uploaded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Which side effect a per-item error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemPhase {
    /// Inserting an input row into the record store.
    RecordInsert,
    /// Uploading an artifact to object storage.
    Upload,
    /// Updating a record with the artifact's public reference.
    RecordUpdate,
}

/// A non-fatal, per-row or per-item failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// The stable key of the failing item.
    pub external_key: String,
    /// The side effect that failed.
    pub phase: ItemPhase,
    /// The collaborator's error message.
    pub message: String,
}

impl ItemError {
    /// Creates a new item error.
    #[must_use]
    pub fn new(external_key: impl Into<String>, phase: ItemPhase, message: impl Into<String>) -> Self {
        Self {
            external_key: external_key.into(),
            phase,
            message: message.into(),
        }
    }
}

/// One unit of generated output awaiting upload.
///
/// Items are never removed from a batch; failures stay attached for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactBatchItem {
    /// Stable key used for the idempotent record update.
    pub external_key: String,
    /// Local file produced by the worker.
    pub local_path: PathBuf,
    /// Routing identifier reported by the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Upload state.
    #[serde(default)]
    pub outcome: ItemOutcome,
    /// Public reference after a successful upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    /// Whether the record update succeeded; `None` until attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_updated: Option<bool>,
    /// Errors attached to this item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemError>,
}

impl ArtifactBatchItem {
    /// Creates a pending item.
    #[must_use]
    pub fn new(external_key: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            external_key: external_key.into(),
            local_path: local_path.into(),
            channel_id: None,
            outcome: ItemOutcome::Pending,
            public_url: None,
            record_updated: None,
            errors: Vec::new(),
        }
    }

    /// Sets the routing identifier.
    #[must_use]
    pub fn with_channel_id(mut self, channel_id: Option<String>) -> Self {
        self.channel_id = channel_id.filter(|c| !c.is_empty());
        self
    }

    /// Marks the item uploaded.
    pub fn mark_uploaded(&mut self, public_url: impl Into<String>) {
        self.outcome = ItemOutcome::Uploaded;
        self.public_url = Some(public_url.into());
    }

    /// Marks the upload failed and attaches the error.
    pub fn mark_upload_failed(&mut self, message: impl Into<String>) {
        self.outcome = ItemOutcome::Failed;
        self.errors
            .push(ItemError::new(self.external_key.clone(), ItemPhase::Upload, message));
    }

    /// Records the result of the record update.
    pub fn record_update_result(&mut self, result: Result<(), String>) {
        match result {
            Ok(()) => self.record_updated = Some(true),
            Err(message) => {
                self.record_updated = Some(false);
                self.errors.push(ItemError::new(
                    self.external_key.clone(),
                    ItemPhase::RecordUpdate,
                    message,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_pending() {
        let item = ArtifactBatchItem::new("2401.00001", "/tmp/a.mp3");
        assert_eq!(item.outcome, ItemOutcome::Pending);
        assert!(item.errors.is_empty());
    }

    #[test]
    fn test_failed_item_keeps_error() {
        let mut item = ArtifactBatchItem::new("k", "/tmp/k.mp3");
        item.mark_upload_failed("bucket not found");

        assert_eq!(item.outcome, ItemOutcome::Failed);
        assert_eq!(item.errors.len(), 1);
        assert_eq!(item.errors[0].phase, ItemPhase::Upload);
        assert_eq!(item.errors[0].external_key, "k");
    }

    #[test]
    fn test_record_update_failure_is_independent_of_upload() {
        let mut item = ArtifactBatchItem::new("k", "/tmp/k.mp3");
        item.mark_uploaded("https://cdn/k.mp3");
        item.record_update_result(Err("row locked".to_string()));

        assert_eq!(item.outcome, ItemOutcome::Uploaded);
        assert_eq!(item.record_updated, Some(false));
        assert_eq!(item.errors[0].phase, ItemPhase::RecordUpdate);
    }

    #[test]
    fn test_empty_channel_id_is_dropped() {
        let item = ArtifactBatchItem::new("k", "/tmp/k.mp3").with_channel_id(Some(String::new()));
        assert!(item.channel_id.is_none());
    }
}
