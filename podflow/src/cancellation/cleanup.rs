//! Registry of run-scoped temporary files.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CleanupEntry {
    label: String,
    path: PathBuf,
}

/// A cleanup step that did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    /// The label the file was registered under.
    pub label: String,
    /// What went wrong.
    pub message: String,
}

/// Temporary files owned by one run, removed in LIFO order.
///
/// Both the normal completion path and the cancellation monitor call
/// [`CleanupRegistry::run_all`]; entries are taken out before removal, so
/// whichever runs second finds nothing left to do.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    entries: Mutex<Vec<CleanupEntry>>,
}

impl CleanupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file for removal.
    pub fn register_file(&self, label: impl Into<String>, path: impl Into<PathBuf>) {
        self.entries.lock().push(CleanupEntry {
            label: label.into(),
            path: path.into(),
        });
    }

    /// Returns the number of pending entries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Removes every registered file, newest first.
    ///
    /// Files that are already gone count as removed. Each removal gets an
    /// equal share of `timeout`; failures are collected, never raised.
    pub async fn run_all(&self, timeout: Duration) -> Vec<CleanupFailure> {
        let entries = std::mem::take(&mut *self.entries.lock());
        if entries.is_empty() {
            return Vec::new();
        }

        let count = u32::try_from(entries.len()).unwrap_or(u32::MAX);
        let per_entry = (timeout / count).max(Duration::from_millis(10));
        let mut failures = Vec::new();

        for entry in entries.into_iter().rev() {
            match tokio::time::timeout(per_entry, remove_file(&entry.path)).await {
                Ok(Ok(())) => debug!(label = %entry.label, path = %entry.path.display(), "Removed temporary file"),
                Ok(Err(e)) => {
                    warn!(label = %entry.label, error = %e, "Temporary file cleanup failed");
                    failures.push(CleanupFailure {
                        label: entry.label,
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(label = %entry.label, "Temporary file cleanup timed out");
                    failures.push(CleanupFailure {
                        label: entry.label,
                        message: "cleanup timed out".to_string(),
                    });
                }
            }
        }

        failures
    }
}

async fn remove_file(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
