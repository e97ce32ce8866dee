//! Run spans, stage timing and the end-of-run wide event.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::Span;
use uuid::Uuid;

use crate::core::Stage;

/// Attributes attached to the `pipeline.run` span.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSpanAttributes {
    /// Run identifier.
    pub run_id: Option<Uuid>,
    /// Uploaded file name.
    pub file_name: Option<String>,
    /// Routing identifier passed to the synthesis worker.
    pub channel_id: Option<String>,
    /// Whether synthesis was disabled for this run.
    pub skip_audio: bool,
}

impl RunSpanAttributes {
    /// Creates attributes for a run.
    #[must_use]
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id: Some(run_id),
            ..Self::default()
        }
    }

    /// Sets the file name.
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Sets the routing identifier.
    #[must_use]
    pub fn with_channel_id(mut self, channel_id: Option<String>) -> Self {
        self.channel_id = channel_id;
        self
    }

    /// Sets the synthesis flag.
    #[must_use]
    pub fn with_skip_audio(mut self, skip: bool) -> Self {
        self.skip_audio = skip;
        self
    }

    /// Builds the run span every stage executes inside.
    #[must_use]
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "pipeline.run",
            run_id = %self.run_id.map(|id| id.to_string()).unwrap_or_default(),
            file_name = self.file_name.as_deref().unwrap_or(""),
            channel_id = self.channel_id.as_deref().unwrap_or(""),
            skip_audio = self.skip_audio,
        )
    }
}

/// Wall-clock durations of the stages a run went through.
#[derive(Debug)]
pub struct StageTimer {
    run_started: Instant,
    current: Option<(Stage, Instant)>,
    durations: BTreeMap<Stage, f64>,
}

impl Default for StageTimer {
    fn default() -> Self {
        Self::start()
    }
}

impl StageTimer {
    /// Starts timing a run.
    #[must_use]
    pub fn start() -> Self {
        Self {
            run_started: Instant::now(),
            current: None,
            durations: BTreeMap::new(),
        }
    }

    /// Closes the current stage, if any, and opens `stage`.
    pub fn enter(&mut self, stage: Stage) {
        self.close();
        if !stage.is_terminal() {
            self.current = Some((stage, Instant::now()));
        }
    }

    /// Closes the current stage.
    pub fn close(&mut self) {
        if let Some((stage, started)) = self.current.take() {
            self.durations.insert(stage, started.elapsed().as_secs_f64() * 1000.0);
        }
    }

    /// Returns the milliseconds spent in each closed stage.
    #[must_use]
    pub fn durations_ms(&self) -> &BTreeMap<Stage, f64> {
        &self.durations
    }

    /// Returns the run's start instant.
    #[must_use]
    pub fn run_started(&self) -> Instant {
        self.run_started
    }
}

/// Logs one wide event describing a finished run.
pub fn emit_run_event(attrs: &RunSpanAttributes, final_stage: Stage, timer: &StageTimer, error: Option<&str>) {
    let stages: BTreeMap<String, f64> = timer
        .durations_ms()
        .iter()
        .map(|(stage, ms)| (stage.to_string(), (ms * 100.0).round() / 100.0))
        .collect();
    let payload = serde_json::json!({
        "run_id": attrs.run_id,
        "file_name": attrs.file_name,
        "final_stage": final_stage.to_string(),
        "elapsed_seconds": crate::utils::elapsed_seconds(timer.run_started()),
        "stage_ms": stages,
        "error": error,
    });
    match error {
        Some(_) => tracing::warn!(target: "podflow::run", event = %payload, "pipeline.run.failed"),
        None => tracing::info!(target: "podflow::run", event = %payload, "pipeline.run.completed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_timer_records_closed_stages() {
        let mut timer = StageTimer::start();
        timer.enter(Stage::Ingest);
        timer.enter(Stage::Validate);
        timer.enter(Stage::Done);

        let durations = timer.durations_ms();
        assert!(durations.contains_key(&Stage::Ingest));
        assert!(durations.contains_key(&Stage::Validate));
        assert!(!durations.contains_key(&Stage::Done));
    }

    #[test]
    fn test_span_builds_without_subscriber() {
        let attrs = RunSpanAttributes::new(Uuid::nil())
            .with_file_name("papers.xlsx")
            .with_skip_audio(true);
        let _entered = attrs.span().entered();
        emit_run_event(&attrs, Stage::Done, &StageTimer::start(), None);
    }
}
