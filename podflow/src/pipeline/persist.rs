//! Idempotent record persistence for input rows.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::core::{ItemError, ItemPhase};
use crate::ingest::{record_for, InputRow};
use crate::services::RecordStore;

/// Which of the three summary variants a persistence pass produced.
///
/// Exactly one applies per pass: any failure wins, then all-skipped, then
/// success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    /// Every row was already present; nothing was written.
    AllSkipped,
    /// Every row was inserted or already present, and at least one was inserted.
    AllSucceeded,
    /// At least one insert failed.
    HasFailures,
}

impl fmt::Display for PersistOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllSkipped => write!(f, "all_skipped"),
            Self::AllSucceeded => write!(f, "all_succeeded"),
            Self::HasFailures => write!(f, "has_failures"),
        }
    }
}

/// Aggregate counts of one persistence pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistSummary {
    /// Rows inserted.
    pub success: usize,
    /// Rows whose insert (or lookup) failed.
    pub failed: usize,
    /// Rows already present.
    pub skipped: usize,
    /// Per-row errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ItemError>,
}

impl PersistSummary {
    /// Returns the summary variant.
    #[must_use]
    pub fn outcome(&self) -> PersistOutcome {
        if self.failed > 0 {
            PersistOutcome::HasFailures
        } else if self.success == 0 {
            PersistOutcome::AllSkipped
        } else {
            PersistOutcome::AllSucceeded
        }
    }

    /// Total rows processed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.success + self.failed + self.skipped
    }

    /// The human-readable rendering of the variant.
    #[must_use]
    pub fn message(&self) -> String {
        match self.outcome() {
            PersistOutcome::AllSkipped => {
                format!("All {} records already present, nothing to do", self.skipped)
            }
            PersistOutcome::AllSucceeded if self.skipped > 0 => format!(
                "Saved {} new records ({} already present)",
                self.success, self.skipped
            ),
            PersistOutcome::AllSucceeded => format!("Saved {} records", self.success),
            PersistOutcome::HasFailures => format!(
                "{} of {} records failed to save (saved {}, already present {})",
                self.failed,
                self.total(),
                self.success,
                self.skipped
            ),
        }
    }

    /// The summary as notification details.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "success": self.success,
            "failed": self.failed,
            "skipped": self.skipped,
            "outcome": self.outcome(),
            "errors": self.errors,
        })
    }
}

/// Looks up and inserts every row, one call per row.
///
/// An existing key is a skip and causes no write. A failed lookup or insert
/// is recorded against the row and processing moves on to the next row.
/// `keys[i]` is the idempotency key of `rows[i]`.
pub async fn persist_rows(
    store: &dyn RecordStore,
    rows: &[InputRow],
    keys: &[String],
    key_column: &str,
    on_row: &(dyn Fn(usize, usize) + Send + Sync),
) -> PersistSummary {
    let mut summary = PersistSummary::default();
    let total = rows.len();

    for (idx, (row, key)) in rows.iter().zip(keys).enumerate() {
        match store.find_by_key(key).await {
            Ok(Some(_)) => {
                debug!(external_key = %key, "Record already present, skipping");
                summary.skipped += 1;
            }
            Ok(None) => match store.insert(&record_for(row, key_column, key)).await {
                Ok(()) => summary.success += 1,
                Err(e) => {
                    warn!(external_key = %key, error = %e, "Record insert failed");
                    summary.failed += 1;
                    summary.errors.push(ItemError::new(key.clone(), ItemPhase::RecordInsert, e.to_string()));
                }
            },
            Err(e) => {
                warn!(external_key = %key, error = %e, "Record lookup failed");
                summary.failed += 1;
                summary
                    .errors
                    .push(ItemError::new(key.clone(), ItemPhase::RecordInsert, format!("lookup failed: {e}")));
            }
        }
        on_row(idx + 1, total);
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ServiceError;
    use crate::services::MockRecordStore;
    use crate::testing::InMemoryRecordStore;
    use mockall::predicate::eq;

    fn rows(keys: &[&str]) -> (Vec<InputRow>, Vec<String>) {
        let rows = keys
            .iter()
            .enumerate()
            .map(|(i, k)| InputRow::from_pairs(i, [("arxiv_id", *k), ("title", "T")]))
            .collect();
        (rows, keys.iter().map(|k| (*k).to_string()).collect())
    }

    #[tokio::test]
    async fn test_two_new_rows() {
        let store = InMemoryRecordStore::new("arxiv_id");
        let (rows, keys) = rows(&["a", "b"]);

        let summary = persist_rows(&store, &rows, &keys, "arxiv_id", &|_, _| {}).await;
        assert_eq!((summary.success, summary.failed, summary.skipped), (2, 0, 0));
        assert_eq!(summary.outcome(), PersistOutcome::AllSucceeded);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_existing_key_is_skipped_without_write() {
        let mut store = MockRecordStore::new();
        store
            .expect_find_by_key()
            .with(eq("a"))
            .returning(|_| Ok(Some(serde_json::json!({"arxiv_id": "a"}))));
        store.expect_insert().never();
        let (rows, keys) = rows(&["a"]);

        let summary = persist_rows(&store, &rows, &keys, "arxiv_id", &|_, _| {}).await;
        assert_eq!((summary.success, summary.failed, summary.skipped), (0, 0, 1));
        assert_eq!(summary.outcome(), PersistOutcome::AllSkipped);
        assert!(summary.message().contains("already present"));
    }

    #[tokio::test]
    async fn test_insert_failure_does_not_stop_remaining_rows() {
        let mut store = MockRecordStore::new();
        store.expect_find_by_key().times(3).returning(|_| Ok(None));
        store.expect_insert().times(3).returning(|record| {
            if record.get("arxiv_id") == Some(&serde_json::json!("b")) {
                Err(ServiceError::Http {
                    status: 409,
                    body: "duplicate key".to_string(),
                })
            } else {
                Ok(())
            }
        });
        let (rows, keys) = rows(&["a", "b", "c"]);

        let calls = parking_lot::Mutex::new(Vec::new());
        let summary = persist_rows(&store, &rows, &keys, "arxiv_id", &|i, n| calls.lock().push((i, n))).await;

        assert_eq!((summary.success, summary.failed, summary.skipped), (2, 1, 0));
        assert_eq!(summary.outcome(), PersistOutcome::HasFailures);
        assert_eq!(summary.errors[0].external_key, "b");
        assert_eq!(calls.lock().clone(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn test_outcome_variants_are_exclusive() {
        let cases = [
            (0, 0, 3, PersistOutcome::AllSkipped),
            (3, 0, 0, PersistOutcome::AllSucceeded),
            (1, 0, 2, PersistOutcome::AllSucceeded),
            (1, 1, 1, PersistOutcome::HasFailures),
            (0, 2, 0, PersistOutcome::HasFailures),
        ];
        for (success, failed, skipped, expected) in cases {
            let summary = PersistSummary {
                success,
                failed,
                skipped,
                errors: Vec::new(),
            };
            assert_eq!(summary.outcome(), expected, "{success}/{failed}/{skipped}");
        }
    }
}
