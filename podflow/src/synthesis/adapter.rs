//! Supervision of the speech-synthesis worker process.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::classify::{LineClassifier, WorkerEvent};
use super::result::SynthesisResultFile;
use crate::config::PodflowConfig;
use crate::core::{ArtifactBatchItem, Stage};
use crate::errors::{PodflowError, StageFailure};
use crate::framing::LineReassembler;

const STDERR_TAIL_LINES: usize = 5;
const READ_CHUNK: usize = 8 * 1024;

/// Inputs for one synthesis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    /// The materialized script artifact.
    pub script_path: PathBuf,
    /// Directory the worker writes audio and its result file into.
    pub output_dir: PathBuf,
    /// Routing identifier forwarded to the worker.
    pub channel_id: Option<String>,
}

/// What a successful synthesis run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisOutcome {
    /// Generated items, all pending upload.
    pub items: Vec<ArtifactBatchItem>,
    /// Whether the result file was present and readable.
    pub result_file_found: bool,
    /// Items the worker reported as failed.
    pub reported_failed: u32,
    /// Worker-reported duration in seconds.
    pub worker_elapsed: Option<f64>,
}

/// Callback receiving classified worker output as it arrives.
pub type WorkerEventSink<'a> = &'a (dyn Fn(WorkerEvent) + Send + Sync);

/// Produces audio artifacts from a script artifact.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Runs synthesis to completion.
    ///
    /// A non-zero worker exit is a [`StageFailure`] carrying the exit code.
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        on_event: WorkerEventSink<'_>,
    ) -> Result<SynthesisOutcome, StageFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputLine {
    stream: OutputStream,
    text: String,
}

/// Runs the worker as a subprocess:
/// `<program> <script> --script <path> --output-dir <dir> [--channel-id <id>]`.
///
/// Standard output and standard error are read concurrently, each through
/// its own line buffer. Stdout lines are classified; stderr lines are only
/// logged. A worker that is still running when the caller stops waiting is
/// left to finish on its own.
#[derive(Debug, Clone)]
pub struct ExternalProcessAdapter {
    program: String,
    script: String,
    classifier: Arc<LineClassifier>,
}

impl ExternalProcessAdapter {
    /// Creates an adapter for `program script`.
    pub fn new(program: impl Into<String>, script: impl Into<String>) -> Result<Self, PodflowError> {
        let classifier = LineClassifier::standard()
            .map_err(|e| PodflowError::Config(format!("invalid worker output rule: {e}")))?;
        Ok(Self {
            program: program.into(),
            script: script.into(),
            classifier: Arc::new(classifier),
        })
    }

    /// Creates an adapter from the synthesis settings.
    pub fn from_config(config: &PodflowConfig) -> Result<Self, PodflowError> {
        Self::new(config.synthesis_program.clone(), config.synthesis_script.clone())
    }

    fn command(&self, request: &SynthesisRequest) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(&self.script)
            .arg("--script")
            .arg(&request.script_path)
            .arg("--output-dir")
            .arg(&request.output_dir);
        if let Some(channel_id) = request.channel_id.as_deref().filter(|c| !c.is_empty()) {
            command.arg("--channel-id").arg(channel_id);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        command
    }
}

#[async_trait]
impl Synthesizer for ExternalProcessAdapter {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        on_event: WorkerEventSink<'_>,
    ) -> Result<SynthesisOutcome, StageFailure> {
        let stage = Stage::SynthesizeAudio;
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| StageFailure::new(stage, format!("failed to create output directory: {e}")))?;

        let mut child = self
            .command(&request)
            .spawn()
            .map_err(|e| StageFailure::new(stage, format!("failed to start worker '{}': {e}", self.program)))?;
        info!(pid = ?child.id(), program = %self.program, "Synthesis worker started");

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, OutputStream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut status = None;
        let mut streams_open = true;

        while streams_open || status.is_none() {
            tokio::select! {
                line = rx.recv(), if streams_open => match line {
                    Some(OutputLine { stream: OutputStream::Stdout, text }) => {
                        match self.classifier.classify(&text) {
                            WorkerEvent::Unclassified { line } => debug!(line = %line, "worker stdout"),
                            event => on_event(event),
                        }
                    }
                    Some(OutputLine { stream: OutputStream::Stderr, text }) => {
                        warn!(line = %text, "worker stderr");
                        if stderr_tail.len() == STDERR_TAIL_LINES {
                            stderr_tail.pop_front();
                        }
                        stderr_tail.push_back(text);
                    }
                    None => streams_open = false,
                },
                exit = child.wait(), if status.is_none() => {
                    let exit = exit.map_err(|e| StageFailure::new(stage, format!("failed to wait for worker: {e}")))?;
                    status = Some(exit);
                }
            }
        }

        let Some(status) = status else {
            return Err(StageFailure::new(stage, "worker exit status unavailable"));
        };
        match status.code() {
            Some(0) => {}
            Some(code) => {
                let tail: Vec<String> = stderr_tail.into_iter().collect();
                let tail = tail.join("\n");
                warn!(exit_code = code, "Synthesis worker failed");
                return Err(StageFailure::exit_code(stage, code, Some(tail.as_str())));
            }
            None => return Err(StageFailure::new(stage, "worker terminated by signal")),
        }

        let outcome = match SynthesisResultFile::read(&request.output_dir).await {
            Some(result) => {
                let reported_failed = result.failed;
                let worker_elapsed = Some(result.elapsed_time);
                SynthesisOutcome {
                    items: result.into_items(&request.output_dir, request.channel_id.as_deref()),
                    result_file_found: true,
                    reported_failed,
                    worker_elapsed,
                }
            }
            None => SynthesisOutcome::default(),
        };
        info!(items = outcome.items.len(), "Synthesis worker finished");
        Ok(outcome)
    }
}

async fn pump_lines<R>(mut reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = LineReassembler::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for text in lines.push(&buf[..n]) {
                    if tx.send(OutputLine { stream, text }).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(?stream, error = %e, "Worker output read failed");
                break;
            }
        }
    }
    if let Some(text) = lines.finish() {
        let _ = tx.send(OutputLine { stream, text });
    }
}
