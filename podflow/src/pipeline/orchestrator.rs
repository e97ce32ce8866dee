//! The top-level pipeline state machine.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::dispatch::EventDispatcher;
use super::materialize::{materialize, select_output, ScriptFormat};
use super::persist::persist_rows;
use super::run::{PipelineRun, RunRequest};
use super::summary::{
    cancellation_notification, failure_notification, has_warnings, persist_percent, rejection_notification,
    success_notification, synthesis_percent, upload_percent, RunReport, RunStatus,
};
use crate::cancellation::{CancelReason, CancellationMonitor, CancellationToken, CleanupRegistry, MonitorOutcome};
use crate::config::PodflowConfig;
use crate::core::{ProgressNotification, Stage};
use crate::errors::{PodflowError, StageFailure, ValidationError};
use crate::events::{NotificationSink, ProgressChannel, StreamSink};
use crate::ingest::{
    idempotency_key, validate_artifact, ArtifactKind, DelimitedRowParser, RowParser, UploadedArtifact,
};
use crate::observability::{emit_run_event, RunSpanAttributes, StageTimer};
use crate::services::{Services, WorkflowRunRequest};
use crate::synthesis::{ExternalProcessAdapter, SynthesisRequest, Synthesizer, WorkerEvent};
use crate::upload::{UploadCoordinator, UploadProgress};
use crate::utils::{date_partition, elapsed_seconds, generate_run_id};

const UPLOAD_CLEANUP_LABEL: &str = "upload";

/// Per-run collaborators shared between the orchestrator and the monitor.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Run identifier.
    pub run_id: Uuid,
    /// The client's notification channel.
    pub channel: Arc<ProgressChannel>,
    /// Checked at every stage boundary.
    pub token: Arc<CancellationToken>,
    /// Temporary files owned by the run.
    pub cleanup: Arc<CleanupRegistry>,
}

impl RunContext {
    /// Creates a context delivering into `sink` under a fresh run id.
    #[must_use]
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            run_id: generate_run_id(),
            channel: Arc::new(ProgressChannel::new(sink)),
            token: Arc::new(CancellationToken::new()),
            cleanup: Arc::new(CleanupRegistry::new()),
        }
    }
}

/// Why the stage sequence stopped before `Done`.
#[derive(Debug)]
enum Interrupt {
    Cancelled(CancelReason),
    Failed(StageFailure),
}

impl From<StageFailure> for Interrupt {
    fn from(failure: StageFailure) -> Self {
        Self::Failed(failure)
    }
}

/// A launched run: its frame stream and a handle to its completion.
#[derive(Debug)]
pub struct RunHandle {
    /// Run identifier.
    pub run_id: Uuid,
    /// Encoded notification frames, ending after the terminal one.
    pub frames: UnboundedReceiver<String>,
    /// Completion of the run and its monitor.
    pub completion: RunCompletion,
}

/// The spawned run task and its cancellation monitor.
#[derive(Debug)]
pub struct RunCompletion {
    task: JoinHandle<RunReport>,
    monitor: CancellationMonitor,
}

impl RunCompletion {
    /// Waits for the run, then for the monitor.
    pub async fn wait(self) -> Result<(RunReport, MonitorOutcome), JoinError> {
        match self.task.await {
            Ok(report) => Ok((report, self.monitor.join().await)),
            Err(e) => {
                self.monitor.abort();
                Err(e)
            }
        }
    }
}

/// Drives one request through every stage.
///
/// The orchestrator is the only writer of progress notifications. Stages run
/// strictly in sequence; the cancellation token is consulted only between
/// them, so a call in flight always runs to completion.
pub struct PipelineOrchestrator {
    config: Arc<PodflowConfig>,
    services: Services,
    parser: Arc<dyn RowParser>,
    synthesizer: Arc<dyn Synthesizer>,
    live: Mutex<HashMap<Uuid, Arc<CancellationToken>>>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("output_root", &self.config.output_root)
            .field("services", &self.services)
            .field("live_runs", &self.live_runs())
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Creates an orchestrator from explicit collaborators.
    #[must_use]
    pub fn new(
        config: Arc<PodflowConfig>,
        services: Services,
        parser: Arc<dyn RowParser>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            config,
            services,
            parser,
            synthesizer,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Wires the HTTP collaborators, the delimited row parser and the
    /// subprocess synthesizer.
    pub fn from_config(config: Arc<PodflowConfig>) -> Result<Self, PodflowError> {
        let services = Services::http(&config)?;
        let synthesizer = Arc::new(ExternalProcessAdapter::from_config(&config)?);
        Ok(Self::new(config, services, Arc::new(DelimitedRowParser), synthesizer))
    }

    /// The shared configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<PodflowConfig> {
        &self.config
    }

    /// Number of runs currently executing.
    #[must_use]
    pub fn live_runs(&self) -> usize {
        self.live.lock().len()
    }

    /// Cancels every live run for server shutdown.
    ///
    /// Each run stops at its next stage boundary and ends its channel with an
    /// error notification. Returns the number of runs cancelled.
    pub fn shutdown(&self) -> usize {
        let live = self.live.lock();
        for (run_id, token) in live.iter() {
            debug!(run_id = %run_id, "Cancelling run for shutdown");
            token.cancel(CancelReason::Shutdown);
        }
        if !live.is_empty() {
            warn!(runs = live.len(), "Cancelling live pipeline runs for shutdown");
        }
        live.len()
    }

    /// Spawns a run whose notifications are delivered as encoded frames.
    ///
    /// Dropping [`RunHandle::frames`] before the terminal frame counts as a
    /// client disconnect.
    pub fn launch(self: &Arc<Self>, request: RunRequest) -> RunHandle {
        let (tx, frames) = mpsc::unbounded_channel();
        let disconnect_tx = tx.clone();
        let ctx = RunContext::new(Arc::new(StreamSink::new(tx)));
        let run_id = ctx.run_id;

        let monitor = CancellationMonitor::spawn(
            run_id,
            async move { disconnect_tx.closed().await },
            ctx.channel.closed_signal(),
            ctx.token.clone(),
            ctx.cleanup.clone(),
            self.config.cleanup_timeout(),
        );

        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run(request, ctx).await });

        RunHandle {
            run_id,
            frames,
            completion: RunCompletion { task, monitor },
        }
    }

    /// Runs the pipeline to a terminal state inside the run span.
    ///
    /// Exactly one terminal notification is sent unless the client
    /// disconnected first.
    /// Temporary files are removed on every path.
    pub async fn run(&self, request: RunRequest, ctx: RunContext) -> RunReport {
        let channel_id = request
            .channel_id
            .clone()
            .or_else(|| self.config.default_channel_id.clone());
        let mut attrs = RunSpanAttributes::new(ctx.run_id)
            .with_channel_id(channel_id)
            .with_skip_audio(request.skip_audio);
        if let Some(artifact) = &request.artifact {
            attrs = attrs.with_file_name(artifact.file_name.clone());
        }

        let span = attrs.span();
        let mut timer = StageTimer::start();
        self.live.lock().insert(ctx.run_id, Arc::clone(&ctx.token));
        let report = self.execute(request, &ctx, &mut timer).instrument(span.clone()).await;
        self.live.lock().remove(&ctx.run_id);

        let failures = ctx
            .cleanup
            .run_all(self.config.cleanup_timeout())
            .instrument(span)
            .await;
        for failure in &failures {
            warn!(run_id = %ctx.run_id, label = %failure.label, error = %failure.message, "Temporary file cleanup failed");
        }

        timer.close();
        emit_run_event(&attrs, report.final_stage, &timer, report.error.as_deref());
        report
    }

    async fn execute(&self, request: RunRequest, ctx: &RunContext, timer: &mut StageTimer) -> RunReport {
        let started = Instant::now();
        let (artifact, kind) = match accept(request.artifact.clone()) {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(run_id = %ctx.run_id, error = %e, "Rejected upload");
                ctx.channel.send(rejection_notification(ctx.run_id, &e));
                return RunReport::rejected(ctx.run_id, &e, elapsed_seconds(started));
            }
        };

        let run_dir = self.run_dir(ctx.run_id);
        let mut run = PipelineRun::new(ctx.run_id, run_dir);
        info!(run_id = %run.run_id, file_name = %artifact.file_name, kind = %kind, "Pipeline run started");

        match self.stages(&mut run, artifact, kind, &request, ctx, timer).await {
            Ok(()) => {
                let status = if has_warnings(&run) {
                    RunStatus::SucceededWithWarnings
                } else {
                    RunStatus::Succeeded
                };
                info!(run_id = %run.run_id, status = %status, "Pipeline run finished");
                ctx.channel.send(success_notification(&run));
                RunReport::from_run(&run, status, None)
            }
            Err(Interrupt::Failed(failure)) => {
                error!(run_id = %run.run_id, stage = %failure.stage, error = %failure.message, "Pipeline run failed");
                run.fail();
                ctx.channel.send(failure_notification(&run, &failure));
                RunReport::from_run(&run, RunStatus::Failed, Some(failure.message))
            }
            Err(Interrupt::Cancelled(reason)) => {
                warn!(run_id = %run.run_id, stage = %run.stage(), reason = %reason, "Pipeline run cancelled");
                if reason == CancelReason::Shutdown {
                    ctx.channel.send(cancellation_notification(&run, reason));
                }
                let mut report = RunReport::from_run(&run, RunStatus::Cancelled, None);
                report.cancelled = Some(reason);
                report
            }
        }
    }

    fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.config
            .output_root
            .join(date_partition(chrono::Utc::now()))
            .join(run_id.to_string())
    }

    /// Moves to `next` unless the run was cancelled in the meantime.
    fn enter(run: &mut PipelineRun, ctx: &RunContext, timer: &mut StageTimer, next: Stage) -> Result<(), Interrupt> {
        if let Some(reason) = ctx.token.should_stop_before(next) {
            return Err(Interrupt::Cancelled(reason));
        }
        run.advance(next)
            .map_err(|e| StageFailure::new(next, e.to_string()))?;
        timer.enter(next);
        Ok(())
    }

    async fn stages(
        &self,
        run: &mut PipelineRun,
        artifact: UploadedArtifact,
        kind: ArtifactKind,
        request: &RunRequest,
        ctx: &RunContext,
        timer: &mut StageTimer,
    ) -> Result<(), Interrupt> {
        let channel = ctx.channel.as_ref();

        timer.enter(Stage::Ingest);
        self.ingest(run, &artifact, kind, ctx).await?;

        Self::enter(run, ctx, timer, Stage::Validate)?;
        if run.rows.is_empty() {
            return Err(StageFailure::new(Stage::Validate, ValidationError::NoRows.to_string()).into());
        }
        run.row_keys = run
            .rows
            .iter()
            .map(|row| idempotency_key(row, &self.config.record_key_column))
            .collect();
        channel.progress("parsed", format!("Parsed {} rows", run.rows.len()), 5);

        Self::enter(run, ctx, timer, Stage::PersistRecords)?;
        channel.progress("persisting", format!("Saving {} records", run.rows.len()), 10);
        run.persist = persist_rows(
            self.services.records.as_ref(),
            &run.rows,
            &run.row_keys,
            &self.config.record_key_column,
            &|done, total| {
                channel.progress("persisting", format!("Saved {done}/{total} records"), persist_percent(done, total));
            },
        )
        .await;
        info!(
            success = run.persist.success,
            failed = run.persist.failed,
            skipped = run.persist.skipped,
            outcome = %run.persist.outcome(),
            "Records persisted"
        );
        channel.progress("records_saved", run.persist.message(), 30);

        Self::enter(run, ctx, timer, Stage::InvokeWorkflow)?;
        self.invoke_workflow(run, artifact, kind, channel).await?;

        Self::enter(run, ctx, timer, Stage::MaterializeArtifact)?;
        let outputs = run.workflow.as_ref().map(|w| &w.outputs).cloned().unwrap_or_default();
        let text = select_output(&outputs, &self.config.workflow_output_key)?;
        let script = materialize(&run.run_dir, &text, &run.row_keys).await?;
        match script.format {
            ScriptFormat::RawText => {
                channel.send(
                    ProgressNotification::progress(
                        "format_fallback",
                        "Script output is not structured, stored as raw text",
                        75,
                    )
                    .with_detail("script_format", serde_json::json!(ScriptFormat::RawText)),
                );
            }
            ScriptFormat::Segments => {
                channel.progress("script_saved", format!("Saved script with {} segments", script.segments), 75);
            }
        }
        let script_path = script.path.clone();
        run.script = Some(script);

        if request.skip_audio {
            run.synthesis_skipped = true;
            info!(run_id = %run.run_id, "Audio generation skipped by request");
            channel.progress("audio_skipped", "Audio generation skipped", 90);
            return Self::enter(run, ctx, timer, Stage::Done);
        }

        Self::enter(run, ctx, timer, Stage::SynthesizeAudio)?;
        self.synthesize(run, script_path, request, channel).await?;

        if run.items.is_empty() {
            info!(run_id = %run.run_id, "No audio produced, nothing to upload");
            return Self::enter(run, ctx, timer, Stage::Done);
        }

        Self::enter(run, ctx, timer, Stage::UploadArtifacts)?;
        channel.progress("uploading", format!("Uploading {} audio files", run.items.len()), 90);
        let coordinator = UploadCoordinator::new(
            Arc::clone(&self.services.storage),
            Arc::clone(&self.services.records),
            Arc::clone(&self.config),
        );
        let summary = coordinator
            .run(&mut run.items, &|progress| match progress {
                UploadProgress::Uploaded {
                    index,
                    total,
                    external_key,
                    ok,
                } => {
                    let message = if ok {
                        format!("Uploaded {index}/{total}: {external_key}")
                    } else {
                        format!("Upload failed {index}/{total}: {external_key}")
                    };
                    channel.progress("uploading", message, upload_percent(index, total));
                }
                UploadProgress::UpdatingRecords { pending } => {
                    channel.progress("updating_records", format!("Updating {pending} records"), 99);
                }
            })
            .await;
        info!(
            uploaded = summary.uploaded,
            upload_failed = summary.upload_failed,
            records_updated = summary.records_updated,
            "Artifacts uploaded"
        );
        run.upload = Some(summary);

        Self::enter(run, ctx, timer, Stage::Done)
    }

    async fn ingest(
        &self,
        run: &mut PipelineRun,
        artifact: &UploadedArtifact,
        kind: ArtifactKind,
        ctx: &RunContext,
    ) -> Result<(), StageFailure> {
        let io_failure = |e: std::io::Error| StageFailure::new(Stage::Ingest, format!("failed to prepare run directory: {e}"));

        tokio::fs::create_dir_all(&run.run_dir).await.map_err(io_failure)?;
        let upload_path = run.run_dir.join(format!("upload_{}", artifact.safe_file_name()));
        tokio::fs::write(&upload_path, &artifact.bytes).await.map_err(io_failure)?;
        ctx.cleanup.register_file(UPLOAD_CLEANUP_LABEL, &upload_path);
        debug!(path = %upload_path.display(), "Stored temporary upload");
        run.upload_path = Some(upload_path);

        ctx.channel.progress(
            "validating",
            format!("Received {} ({} bytes)", artifact.file_name, artifact.bytes.len()),
            2,
        );
        run.rows = self
            .parser
            .parse(artifact, kind)
            .map_err(|e| StageFailure::new(Stage::Ingest, e.to_string()))?;
        Ok(())
    }

    async fn invoke_workflow(
        &self,
        run: &mut PipelineRun,
        artifact: UploadedArtifact,
        kind: ArtifactKind,
        channel: &ProgressChannel,
    ) -> Result<(), StageFailure> {
        channel.progress("uploading_file", "Uploading spreadsheet to the workflow service", 35);
        let content_type = artifact
            .content_type
            .clone()
            .unwrap_or_else(|| kind.mime().to_string());
        let file_id = self
            .services
            .workflow
            .upload_file(&artifact.file_name, &content_type, artifact.bytes)
            .await
            .map_err(|e| StageFailure::new(Stage::InvokeWorkflow, format!("file upload failed: {e}")))?;
        debug!(file_id = %file_id, "Workflow input uploaded");

        let request = WorkflowRunRequest::with_uploaded_file(
            &self.config.workflow_file_variable,
            &file_id,
            &self.config.workflow_user,
        );
        let stream = self
            .services
            .workflow
            .run_streaming(request)
            .await
            .map_err(|e| StageFailure::new(Stage::InvokeWorkflow, format!("workflow run failed: {e}")))?;

        run.workflow = Some(EventDispatcher::new(channel).run(stream).await?);
        Ok(())
    }

    async fn synthesize(
        &self,
        run: &mut PipelineRun,
        script_path: PathBuf,
        request: &RunRequest,
        channel: &ProgressChannel,
    ) -> Result<(), StageFailure> {
        channel.progress("synthesizing", "Generating audio", 80);
        let synthesis = SynthesisRequest {
            script_path,
            output_dir: run.run_dir.clone(),
            channel_id: request
                .channel_id
                .clone()
                .or_else(|| self.config.default_channel_id.clone()),
        };

        let on_event = |event: WorkerEvent| match event {
            WorkerEvent::GenerationComplete { index, total, line } => {
                channel.progress("synthesizing", line, synthesis_percent(index, total));
            }
            WorkerEvent::GenerationFailed { index, total, line } => {
                warn!(index, total, line = %line, "Worker failed an item");
                channel.progress("synthesis_item_failed", line, synthesis_percent(index, total));
            }
            WorkerEvent::GenerationProgress { line }
            | WorkerEvent::UploadProgress { line }
            | WorkerEvent::DatabaseUpdate { line } => {
                channel.progress("synthesizing", line, channel.last_percent());
            }
            WorkerEvent::Unclassified { line } => debug!(line = %line, "Worker output"),
        };
        let outcome = self.synthesizer.synthesize(synthesis, &on_event).await?;

        info!(
            items = outcome.items.len(),
            reported_failed = outcome.reported_failed,
            result_file_found = outcome.result_file_found,
            "Audio generated"
        );
        channel.progress("audio_generated", format!("Generated {} audio files", outcome.items.len()), 88);
        run.items.clone_from(&outcome.items);
        run.synthesis = Some(outcome);
        Ok(())
    }
}

fn accept(artifact: Option<UploadedArtifact>) -> Result<(UploadedArtifact, ArtifactKind), ValidationError> {
    let kind = validate_artifact(artifact.as_ref())?;
    let artifact = artifact.ok_or(ValidationError::MissingArtifact)?;
    Ok((artifact, kind))
}
