//! Pipeline stage enumeration and transition rules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One ordered phase of the pipeline state machine.
///
/// Stages advance strictly forward. `Failed` is an absorbing state reachable
/// from any non-terminal stage; no stage is ever re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Reading the uploaded spreadsheet into rows.
    Ingest,
    /// Checking the artifact type and row set.
    Validate,
    /// Idempotent insertion of every row into the record store.
    PersistRecords,
    /// Upload-then-invoke against the generative workflow service.
    InvokeWorkflow,
    /// Writing the generated script to disk.
    MaterializeArtifact,
    /// Running the speech-synthesis worker.
    SynthesizeAudio,
    /// Uploading audio and updating records.
    UploadArtifacts,
    /// Terminal success.
    Done,
    /// Terminal failure.
    Failed,
}

impl Stage {
    /// All forward stages in execution order.
    pub const SEQUENCE: [Self; 8] = [
        Self::Ingest,
        Self::Validate,
        Self::PersistRecords,
        Self::InvokeWorkflow,
        Self::MaterializeArtifact,
        Self::SynthesizeAudio,
        Self::UploadArtifacts,
        Self::Done,
    ];

    /// Returns true for `Done` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns the stage that follows this one on the success path.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        let idx = Self::SEQUENCE.iter().position(|s| s == self)?;
        Self::SEQUENCE.get(idx + 1).copied()
    }

    /// Returns true if the machine may move from `self` to `to`.
    ///
    /// Forward skips are allowed (a disabled stage is passed over), backward
    /// moves and re-entry are not.
    #[must_use]
    pub fn can_transition_to(&self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == Self::Failed {
            return true;
        }
        to > *self
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingest => write!(f, "ingest"),
            Self::Validate => write!(f, "validate"),
            Self::PersistRecords => write!(f, "persist_records"),
            Self::InvokeWorkflow => write!(f, "invoke_workflow"),
            Self::MaterializeArtifact => write!(f, "materialize_artifact"),
            Self::SynthesizeAudio => write!(f, "synthesize_audio"),
            Self::UploadArtifacts => write!(f, "upload_artifacts"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_sequence_is_ordered() {
        for pair in Stage::SEQUENCE.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert_eq!(Stage::Done.next(), None);
        assert_eq!(Stage::Failed.next(), None);
    }

    #[test]
    fn test_forward_only_transitions() {
        assert!(Stage::Ingest.can_transition_to(Stage::Validate));
        assert!(Stage::MaterializeArtifact.can_transition_to(Stage::UploadArtifacts));
        assert!(!Stage::InvokeWorkflow.can_transition_to(Stage::PersistRecords));
        assert!(!Stage::InvokeWorkflow.can_transition_to(Stage::InvokeWorkflow));
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal() {
        for stage in &Stage::SEQUENCE[..7] {
            assert!(stage.can_transition_to(Stage::Failed), "{stage} -> failed");
        }
        assert!(!Stage::Done.can_transition_to(Stage::Failed));
        assert!(!Stage::Failed.can_transition_to(Stage::Failed));
    }

    #[test]
    fn test_stage_serialize() {
        let json = serde_json::to_string(&Stage::SynthesizeAudio).unwrap();
        assert_eq!(json, r#""synthesize_audio""#);
        assert_eq!(Stage::PersistRecords.to_string(), "persist_records");
    }
}
