//! Sequential upload of generated artifacts and record updates.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PodflowConfig;
use crate::core::{ArtifactBatchItem, ItemError, ItemOutcome};
use crate::services::{ObjectStorage, RecordStore};

/// Content type of uploaded audio.
pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

/// Where the coordinator is in its two passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadProgress {
    /// Item `index` (one-based) of `total` finished its upload attempt.
    Uploaded {
        /// One-based position.
        index: usize,
        /// Batch size.
        total: usize,
        /// The item's key.
        external_key: String,
        /// Whether the upload succeeded.
        ok: bool,
    },
    /// The record-update pass is starting.
    UpdatingRecords {
        /// Number of updates to issue.
        pending: usize,
    },
}

/// Aggregate result of both passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    /// Items attempted.
    pub attempted: usize,
    /// Successful uploads.
    pub uploaded: usize,
    /// Failed uploads.
    pub upload_failed: usize,
    /// Successful record updates.
    pub records_updated: usize,
    /// Failed record updates.
    pub record_update_failed: usize,
    /// Per-item errors from both passes.
    pub errors: Vec<ItemError>,
}

impl UploadSummary {
    /// Returns true if any upload or record update failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.upload_failed > 0 || self.record_update_failed > 0
    }

    /// Returns the summary as notification details.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Uploads a batch one item at a time, then updates records one at a time.
///
/// Every item is attempted exactly once. A missing local file or a storage
/// rejection fails only that item; a failed record update is recorded
/// independently of the item's upload outcome.
pub struct UploadCoordinator {
    storage: Arc<dyn ObjectStorage>,
    records: Arc<dyn RecordStore>,
    config: Arc<PodflowConfig>,
}

impl UploadCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(storage: Arc<dyn ObjectStorage>, records: Arc<dyn RecordStore>, config: Arc<PodflowConfig>) -> Self {
        Self {
            storage,
            records,
            config,
        }
    }

    /// Returns the storage path for an item: `{prefix}/{YYYY}/{MM}/{DD}/{key}.mp3`.
    #[must_use]
    pub fn storage_path(&self, external_key: &str, at: chrono::DateTime<chrono::Utc>) -> String {
        let prefix = self.config.storage_path_prefix.trim_matches('/');
        let partition = at.format("%Y/%m/%d");
        if prefix.is_empty() {
            format!("{partition}/{external_key}.mp3")
        } else {
            format!("{prefix}/{partition}/{external_key}.mp3")
        }
    }

    /// Runs both passes over `items`, mutating each item's outcome in place.
    pub async fn run(&self, items: &mut [ArtifactBatchItem], on_progress: &(dyn Fn(UploadProgress) + Send + Sync)) -> UploadSummary {
        let total = items.len();
        let now = chrono::Utc::now();
        let mut summary = UploadSummary {
            attempted: total,
            ..UploadSummary::default()
        };

        for (idx, item) in items.iter_mut().enumerate() {
            match tokio::fs::read(&item.local_path).await {
                Ok(bytes) => {
                    let path = self.storage_path(&item.external_key, now);
                    match self.storage.upload(&path, bytes, AUDIO_CONTENT_TYPE).await {
                        Ok(url) => {
                            info!(external_key = %item.external_key, path = %path, "Uploaded artifact");
                            item.mark_uploaded(url);
                        }
                        Err(e) => {
                            warn!(external_key = %item.external_key, error = %e, "Artifact upload failed");
                            item.mark_upload_failed(e.to_string());
                        }
                    }
                }
                Err(e) => {
                    warn!(external_key = %item.external_key, path = %item.local_path.display(), error = %e, "Artifact file missing");
                    item.mark_upload_failed(format!("local file unavailable: {e}"));
                }
            }
            on_progress(UploadProgress::Uploaded {
                index: idx + 1,
                total,
                external_key: item.external_key.clone(),
                ok: item.outcome == ItemOutcome::Uploaded,
            });
        }

        let pending = items.iter().filter(|i| i.outcome == ItemOutcome::Uploaded).count();
        on_progress(UploadProgress::UpdatingRecords { pending });

        for item in items.iter_mut().filter(|i| i.outcome == ItemOutcome::Uploaded) {
            let Some(url) = item.public_url.clone() else {
                continue;
            };
            let mut fields = serde_json::Map::new();
            fields.insert(self.config.audio_url_column.clone(), serde_json::Value::String(url));
            let result = self
                .records
                .update(&item.external_key, &fields)
                .await
                .map_err(|e| e.to_string());
            if let Err(message) = &result {
                warn!(external_key = %item.external_key, error = %message, "Record update failed");
            }
            item.record_update_result(result);
        }

        for item in items.iter() {
            match item.outcome {
                ItemOutcome::Uploaded => summary.uploaded += 1,
                ItemOutcome::Failed => summary.upload_failed += 1,
                ItemOutcome::Pending => {}
            }
            match item.record_updated {
                Some(true) => summary.records_updated += 1,
                Some(false) => summary.record_update_failed += 1,
                None => {}
            }
            summary.errors.extend(item.errors.iter().cloned());
        }
        summary
    }
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("bucket", &self.config.storage_bucket)
            .finish_non_exhaustive()
    }
}
