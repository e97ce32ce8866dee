//! Pipeline execution.
//!
//! This module provides:
//! - The run state and stage sequencing ([`PipelineOrchestrator`])
//! - Idempotent record persistence
//! - Workflow stream dispatch
//! - Script materialization
//! - Terminal notifications and the run report

mod dispatch;
mod materialize;
mod orchestrator;
mod persist;
mod run;
mod summary;


pub use dispatch::{WorkflowResult, NODE_PERCENT_CAP, STARTED_PERCENT};
pub use materialize::{
    mapping_title, materialize, parse_segments, select_output, MaterializedScript, ScriptFormat, ScriptSegment,
    MAPPING_FILE, SCRIPT_JSON_FILE, SCRIPT_TEXT_FILE,
};
pub use orchestrator::{PipelineOrchestrator, RunCompletion, RunContext, RunHandle};
pub use persist::{persist_rows, PersistOutcome, PersistSummary};
pub use run::{PipelineRun, RunRequest};
pub use summary::{RunReport, RunStatus};
