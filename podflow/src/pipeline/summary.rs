//! Terminal notifications and the run report.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

use super::materialize::ScriptFormat;
use super::persist::PersistSummary;
use super::run::PipelineRun;
use crate::cancellation::CancelReason;
use crate::core::{ProgressNotification, Stage, UsageMetrics};
use crate::errors::{StageFailure, ValidationError};
use crate::upload::UploadSummary;
use crate::utils::elapsed_seconds;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage succeeded.
    Succeeded,
    /// The run succeeded but some rows or items failed.
    SucceededWithWarnings,
    /// A stage failed.
    Failed,
    /// The input was rejected before any stage ran.
    Rejected,
    /// The run was cancelled at a stage boundary.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::SucceededWithWarnings => write!(f, "succeeded_with_warnings"),
            Self::Failed => write!(f, "failed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Server-side record of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// How the run ended.
    pub status: RunStatus,
    /// Last stage reached.
    pub final_stage: Stage,
    /// Wall-clock duration in seconds.
    pub elapsed_seconds: f64,
    /// Terminal error text, for failed and rejected runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the run stopped early, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<CancelReason>,
    /// Persistence counts.
    pub records: PersistSummary,
    /// Upload counts, when the upload stage ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadSummary>,
    /// How the script was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_format: Option<ScriptFormat>,
    /// Upstream usage metrics.
    #[serde(default)]
    pub usage: UsageMetrics,
}

impl RunReport {
    /// Report for input rejected at start.
    #[must_use]
    pub fn rejected(run_id: Uuid, error: &ValidationError, elapsed_seconds: f64) -> Self {
        Self {
            run_id,
            status: RunStatus::Rejected,
            final_stage: Stage::Failed,
            elapsed_seconds,
            error: Some(error.to_string()),
            cancelled: None,
            records: PersistSummary::default(),
            upload: None,
            script_format: None,
            usage: UsageMetrics::default(),
        }
    }

    /// Report for a run that reached a terminal stage or was cancelled.
    #[must_use]
    pub fn from_run(run: &PipelineRun, status: RunStatus, error: Option<String>) -> Self {
        Self {
            run_id: run.run_id,
            status,
            final_stage: run.stage(),
            elapsed_seconds: elapsed_seconds(run.started()),
            error,
            cancelled: None,
            records: run.persist.clone(),
            upload: run.upload.clone(),
            script_format: run.script.as_ref().map(|s| s.format),
            usage: usage_of(run),
        }
    }

    /// Returns true unless the run failed or was rejected.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Succeeded | RunStatus::SucceededWithWarnings)
    }
}

fn usage_of(run: &PipelineRun) -> UsageMetrics {
    run.workflow.as_ref().map(|w| w.usage.clone()).unwrap_or_default()
}

/// Returns true when any row or item failed without failing the run.
#[must_use]
pub fn has_warnings(run: &PipelineRun) -> bool {
    run.persist.failed > 0 || run.upload.as_ref().is_some_and(UploadSummary::has_failures)
}

/// Builds the terminal success notification.
#[must_use]
pub fn success_notification(run: &PipelineRun) -> ProgressNotification {
    let warnings = has_warnings(run);
    let message = if warnings {
        "Pipeline completed with warnings"
    } else {
        "Pipeline completed"
    };

    let mut notification = ProgressNotification::success(message)
        .with_detail("run_id", json!(run.run_id))
        .with_detail("elapsed_time", json!(round2(elapsed_seconds(run.started()))))
        .with_detail("records", run.persist.to_value())
        .with_detail("warnings", json!(warnings))
        .with_detail("audio_skipped", json!(run.synthesis_skipped));

    notification = with_usage(notification, run);
    if let Some(script) = &run.script {
        notification = notification
            .with_detail("script_format", json!(script.format))
            .with_detail("script_path", json!(script.path.display().to_string()))
            .with_detail("segments", json!(script.segments));
    }
    if let Some(upload) = &run.upload {
        notification = notification.with_detail("upload", upload.to_value());
    }
    notification
}

/// Builds the terminal error notification for a stage failure.
#[must_use]
pub fn failure_notification(run: &PipelineRun, failure: &StageFailure) -> ProgressNotification {
    let mut notification = ProgressNotification::error(failure.message.clone())
        .with_detail("run_id", json!(run.run_id))
        .with_detail("stage", json!(failure.stage))
        .with_detail("elapsed_time", json!(round2(elapsed_seconds(run.started()))))
        .with_detail("records", run.persist.to_value());
    if let Some(code) = failure.exit_code {
        notification = notification.with_detail("exit_code", json!(code));
    }
    with_usage(notification, run)
}

/// Adds the upstream usage metric and run id, when the workflow reported them.
fn with_usage(mut notification: ProgressNotification, run: &PipelineRun) -> ProgressNotification {
    let usage = usage_of(run);
    if let Some(tokens) = usage.total_tokens {
        notification = notification.with_detail("total_tokens", json!(tokens));
    }
    if let Some(upstream) = usage.elapsed_time {
        notification = notification.with_detail("workflow_elapsed_time", json!(upstream));
    }
    if let Some(workflow_run_id) = run.workflow.as_ref().and_then(|w| w.workflow_run_id.as_ref()) {
        notification = notification.with_detail("workflow_run_id", json!(workflow_run_id));
    }
    notification
}

/// Builds the terminal error notification for a run cancelled while its
/// client is still listening.
#[must_use]
pub fn cancellation_notification(run: &PipelineRun, reason: CancelReason) -> ProgressNotification {
    let notification = ProgressNotification::error(format!("Pipeline cancelled: {reason}"))
        .with_detail("run_id", json!(run.run_id))
        .with_detail("stage", json!(run.stage()))
        .with_detail("cancelled", json!(reason))
        .with_detail("elapsed_time", json!(round2(elapsed_seconds(run.started()))))
        .with_detail("records", run.persist.to_value());
    with_usage(notification, run)
}

/// Builds the terminal error notification for rejected input.
#[must_use]
pub fn rejection_notification(run_id: Uuid, error: &ValidationError) -> ProgressNotification {
    ProgressNotification::error(error.to_string())
        .with_detail("run_id", json!(run_id))
        .with_detail("stage", json!(Stage::Validate))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Persistence progress, spread over 10..=30.
#[must_use]
pub fn persist_percent(done: usize, total: usize) -> u8 {
    spread(10, 30, done, total)
}

/// Synthesis progress, spread over 80..=88.
#[must_use]
pub fn synthesis_percent(done: u32, total: u32) -> u8 {
    spread(80, 88, done as usize, total as usize)
}

/// Upload progress, spread over 90..=99.
#[must_use]
pub fn upload_percent(done: usize, total: usize) -> u8 {
    spread(90, 99, done, total)
}

fn spread(low: u8, high: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return high;
    }
    let span = usize::from(high - low);
    let offset = span * done.min(total) / total;
    low + u8::try_from(offset).unwrap_or(high - low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ItemError, ItemPhase, NotificationCategory};
    use std::path::PathBuf;

    fn run() -> PipelineRun {
        PipelineRun::new(Uuid::nil(), PathBuf::from("/tmp/run"))
    }

    #[test]
    fn test_spread_is_monotonic_and_bounded() {
        let values: Vec<u8> = (0..=7).map(|i| persist_percent(i, 7)).collect();
        assert_eq!(values.first(), Some(&10));
        assert_eq!(values.last(), Some(&30));
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(upload_percent(0, 0), 99);
        assert_eq!(synthesis_percent(9, 3), 88);
    }

    #[test]
    fn test_success_carries_records_and_usage() {
        let mut run = run();
        run.persist.success = 2;
        run.workflow = Some(super::super::dispatch::WorkflowResult {
            usage: UsageMetrics {
                total_tokens: Some(120),
                ..UsageMetrics::default()
            },
            ..Default::default()
        });

        let n = success_notification(&run);
        assert_eq!(n.category, NotificationCategory::Success);
        assert_eq!(n.message, "Pipeline completed");
        assert_eq!(n.details["records"]["success"], json!(2));
        assert_eq!(n.details["total_tokens"], json!(120));
        assert!(n.details.contains_key("elapsed_time"));
        assert!(!n.details.contains_key("upload"));
    }

    #[test]
    fn test_upload_failures_downgrade_to_warnings() {
        let mut run = run();
        run.upload = Some(UploadSummary {
            attempted: 2,
            uploaded: 1,
            upload_failed: 1,
            errors: vec![ItemError::new("k", ItemPhase::Upload, "denied")],
            ..UploadSummary::default()
        });

        let n = success_notification(&run);
        assert_eq!(n.category, NotificationCategory::Success);
        assert_eq!(n.details["warnings"], json!(true));
        assert_eq!(n.details["upload"]["upload_failed"], json!(1));
    }

    #[test]
    fn test_failure_notification_carries_exit_code() {
        let failure = StageFailure::exit_code(Stage::SynthesizeAudio, 2, None);
        let n = failure_notification(&run(), &failure);
        assert_eq!(n.category, NotificationCategory::Error);
        assert_eq!(n.details["exit_code"], json!(2));
        assert_eq!(n.details["stage"], json!("synthesize_audio"));
        assert!(!n.details.contains_key("total_tokens"));
    }

    #[test]
    fn test_cancellation_notification_names_reason() {
        let n = cancellation_notification(&run(), CancelReason::Shutdown);
        assert_eq!(n.category, NotificationCategory::Error);
        assert_eq!(n.message, "Pipeline cancelled: server shutting down");
        assert_eq!(n.details["cancelled"], json!("shutdown"));
        assert_eq!(n.details["stage"], json!("ingest"));
    }

    #[test]
    fn test_failure_after_workflow_carries_usage() {
        let mut run = run();
        run.workflow = Some(super::super::dispatch::WorkflowResult {
            workflow_run_id: Some("wr-7".to_string()),
            usage: UsageMetrics {
                total_tokens: Some(64),
                elapsed_time: Some(1.5),
                ..UsageMetrics::default()
            },
            ..Default::default()
        });

        let failure = StageFailure::new(Stage::MaterializeArtifact, "failed to write podcast_script.json");
        let n = failure_notification(&run, &failure);
        assert_eq!(n.details["total_tokens"], json!(64));
        assert_eq!(n.details["workflow_elapsed_time"], json!(1.5));
        assert_eq!(n.details["workflow_run_id"], json!("wr-7"));
    }
}
