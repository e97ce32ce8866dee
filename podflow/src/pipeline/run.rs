//! Per-request run state.

use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::dispatch::WorkflowResult;
use super::materialize::MaterializedScript;
use super::persist::PersistSummary;
use crate::core::{ArtifactBatchItem, Stage};
use crate::errors::TransitionError;
use crate::ingest::{InputRow, UploadedArtifact};
use crate::synthesis::SynthesisOutcome;
use crate::upload::UploadSummary;

/// What the client asked for.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// The uploaded spreadsheet, if one was attached.
    pub artifact: Option<UploadedArtifact>,
    /// Skip synthesis and upload entirely.
    pub skip_audio: bool,
    /// Routing identifier forwarded to the worker.
    pub channel_id: Option<String>,
}

impl RunRequest {
    /// Creates a request for `artifact`.
    #[must_use]
    pub fn new(artifact: UploadedArtifact) -> Self {
        Self {
            artifact: Some(artifact),
            skip_audio: false,
            channel_id: None,
        }
    }

    /// Disables synthesis.
    #[must_use]
    pub fn with_skip_audio(mut self, skip: bool) -> Self {
        self.skip_audio = skip;
        self
    }

    /// Sets the routing identifier.
    #[must_use]
    pub fn with_channel_id(mut self, channel_id: Option<String>) -> Self {
        self.channel_id = channel_id.filter(|c| !c.is_empty());
        self
    }
}

/// State of one pipeline run, owned by the orchestrator for its lifetime.
#[derive(Debug)]
pub struct PipelineRun {
    /// Unique run identifier.
    pub run_id: Uuid,
    stage: Stage,
    /// Working directory scoped to this run.
    pub run_dir: PathBuf,
    /// Temporary copy of the uploaded spreadsheet.
    pub upload_path: Option<PathBuf>,
    /// Parsed input rows.
    pub rows: Vec<InputRow>,
    /// Idempotency key per row, by index.
    pub row_keys: Vec<String>,
    /// Outcome of the persistence pass.
    pub persist: PersistSummary,
    /// Outcome of the workflow invocation.
    pub workflow: Option<WorkflowResult>,
    /// The materialized script.
    pub script: Option<MaterializedScript>,
    /// What the worker produced.
    pub synthesis: Option<SynthesisOutcome>,
    /// True when synthesis was disabled by the request.
    pub synthesis_skipped: bool,
    /// Generated items and their upload outcomes.
    pub items: Vec<ArtifactBatchItem>,
    /// Outcome of the upload passes.
    pub upload: Option<UploadSummary>,
    started: Instant,
}

impl PipelineRun {
    /// Creates a run at [`Stage::Ingest`].
    #[must_use]
    pub fn new(run_id: Uuid, run_dir: PathBuf) -> Self {
        Self {
            run_id,
            stage: Stage::Ingest,
            run_dir,
            upload_path: None,
            rows: Vec::new(),
            row_keys: Vec::new(),
            persist: PersistSummary::default(),
            workflow: None,
            script: None,
            synthesis: None,
            synthesis_skipped: false,
            items: Vec::new(),
            upload: None,
            started: Instant::now(),
        }
    }

    /// The current stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// When the run started.
    #[must_use]
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Moves to `to`, refusing backward moves and re-entry.
    pub fn advance(&mut self, to: Stage) -> Result<(), TransitionError> {
        if !self.stage.can_transition_to(to) {
            return Err(TransitionError {
                from: self.stage,
                to,
            });
        }
        debug!(run_id = %self.run_id, from = %self.stage, to = %to, "Stage transition");
        self.stage = to;
        Ok(())
    }

    /// Moves to [`Stage::Failed`] unless already terminal.
    pub fn fail(&mut self) {
        if !self.stage.is_terminal() {
            self.stage = Stage::Failed;
        }
    }
}
