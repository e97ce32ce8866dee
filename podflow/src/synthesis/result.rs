//! The worker's JSON result file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::ArtifactBatchItem;

/// File name the worker writes into its output directory.
pub const RESULT_FILE_NAME: &str = "audio_generation_result.json";

/// One generated file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Where the worker wrote the file.
    pub local_path: PathBuf,
    /// Stable key of the record this file belongs to.
    #[serde(default, alias = "arxiv_id")]
    pub external_key: Option<String>,
    /// Routing identifier.
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Contents of the result file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResultFile {
    /// Items generated.
    #[serde(default)]
    pub success: u32,
    /// Items that failed.
    #[serde(default)]
    pub failed: u32,
    /// Worker-reported duration in seconds.
    #[serde(default)]
    pub elapsed_time: f64,
    /// Generated files.
    #[serde(default)]
    pub files: Vec<ResultEntry>,
}

impl SynthesisResultFile {
    /// Reads the result file from `output_dir`.
    ///
    /// Returns `None` when the file is missing or unreadable; the caller
    /// treats that as an empty batch.
    pub async fn read(output_dir: &Path) -> Option<Self> {
        let path = output_dir.join(RESULT_FILE_NAME);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Worker result file not found, treating batch as empty");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Worker result file unreadable");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Worker result file is not valid JSON");
                None
            }
        }
    }

    /// Converts the listed files into pending batch items.
    ///
    /// Entries without a key fall back to the file stem; relative paths are
    /// resolved against `output_dir`.
    #[must_use]
    pub fn into_items(self, output_dir: &Path, default_channel: Option<&str>) -> Vec<ArtifactBatchItem> {
        self.files
            .into_iter()
            .filter_map(|entry| {
                let key = entry
                    .external_key
                    .filter(|k| !k.trim().is_empty())
                    .or_else(|| {
                        entry
                            .local_path
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .map(str::to_string)
                    })?;
                let path = if entry.local_path.is_absolute() {
                    entry.local_path
                } else {
                    output_dir.join(entry.local_path)
                };
                let channel = entry
                    .channel_id
                    .filter(|c| !c.is_empty())
                    .or_else(|| default_channel.map(str::to_string));
                Some(ArtifactBatchItem::new(key, path).with_channel_id(channel))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SynthesisResultFile::read(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_garbage_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RESULT_FILE_NAME), "not json").unwrap();
        assert!(SynthesisResultFile::read(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn test_reads_worker_format() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(RESULT_FILE_NAME),
            r#"{"success": 2, "failed": 0, "elapsed_time": 12.5, "files": [
                {"local_path": "/out/2401.00001.mp3", "arxiv_id": "2401.00001", "channel_id": "ch-1"},
                {"local_path": "2401.00002.mp3", "arxiv_id": null, "channel_id": ""}
            ]}"#,
        )
        .unwrap();

        let result = SynthesisResultFile::read(dir.path()).await.unwrap();
        assert_eq!(result.success, 2);

        let items = result.into_items(dir.path(), Some("default"));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].external_key, "2401.00001");
        assert_eq!(items[0].channel_id.as_deref(), Some("ch-1"));
        assert_eq!(items[1].external_key, "2401.00002");
        assert_eq!(items[1].local_path, dir.path().join("2401.00002.mp3"));
        assert_eq!(items[1].channel_id.as_deref(), Some("default"));
    }
}
