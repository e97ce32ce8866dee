//! Consumption of the streamed workflow response.

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::core::{FramedEvent, Stage, UsageMetrics, WorkflowEvent, WorkflowOutcome};
use crate::errors::StageFailure;
use crate::events::ProgressChannel;
use crate::framing::FrameReassembler;
use crate::services::ChunkStream;

/// Percent reported when the upstream run starts.
pub const STARTED_PERCENT: u8 = 40;
/// Highest percent node events may reach.
pub const NODE_PERCENT_CAP: u8 = 70;
const NODE_PERCENT_STEP: u8 = 3;

/// What a successful workflow run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowResult {
    /// Upstream run identifier.
    pub workflow_run_id: Option<String>,
    /// Upstream task identifier.
    pub task_id: Option<String>,
    /// Output variables.
    pub outputs: serde_json::Map<String, serde_json::Value>,
    /// Usage metrics.
    pub usage: UsageMetrics,
    /// Frames received, including ignored ones.
    pub frames: u64,
}

/// Maps framed events to progress notifications until a finished event.
pub(crate) struct EventDispatcher<'a> {
    channel: &'a ProgressChannel,
    percent: u8,
    result: WorkflowResult,
}

enum Dispatch {
    Continue,
    Finished(Result<(), StageFailure>),
}

impl<'a> EventDispatcher<'a> {
    pub(crate) fn new(channel: &'a ProgressChannel) -> Self {
        Self {
            channel,
            percent: STARTED_PERCENT,
            result: WorkflowResult::default(),
        }
    }

    /// Drains `stream` through a frame reassembler.
    ///
    /// Returns on the first finished event. A transport error or a stream that
    /// ends without a finished event fails the stage.
    pub(crate) async fn run(mut self, mut stream: ChunkStream) -> Result<WorkflowResult, StageFailure> {
        let mut reassembler = FrameReassembler::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                StageFailure::new(Stage::InvokeWorkflow, format!("workflow stream failed: {e}"))
            })?;
            for frame in reassembler.push(&chunk) {
                if let Dispatch::Finished(outcome) = self.handle(&frame) {
                    return outcome.map(|()| self.result);
                }
            }
        }

        if let Some(frame) = reassembler.finish() {
            if let Dispatch::Finished(outcome) = self.handle(&frame) {
                return outcome.map(|()| self.result);
            }
        }
        warn!(frames = self.result.frames, dropped = reassembler.dropped(), "Workflow stream ended early");
        Err(StageFailure::new(
            Stage::InvokeWorkflow,
            "workflow stream ended without a finished event",
        ))
    }

    fn handle(&mut self, frame: &FramedEvent) -> Dispatch {
        self.result.frames += 1;
        match WorkflowEvent::from(frame) {
            WorkflowEvent::Started {
                workflow_run_id,
                task_id,
            } => {
                info!(workflow_run_id = ?workflow_run_id, "Workflow started");
                self.result.workflow_run_id = workflow_run_id;
                self.result.task_id = task_id;
                self.channel
                    .progress("workflow_started", "Script generation started", STARTED_PERCENT);
            }
            WorkflowEvent::NodeProgress { title, finished } => {
                self.percent = self.percent.saturating_add(NODE_PERCENT_STEP).min(NODE_PERCENT_CAP);
                let title = title.unwrap_or_else(|| "workflow step".to_string());
                let message = if finished {
                    format!("Finished: {title}")
                } else {
                    format!("Running: {title}")
                };
                self.channel.progress("generating", message, self.percent);
            }
            WorkflowEvent::Finished(WorkflowOutcome::Succeeded { outputs, usage }) => {
                info!(total_tokens = ?usage.total_tokens, "Workflow finished");
                self.result.outputs = outputs;
                self.result.usage = usage;
                return Dispatch::Finished(Ok(()));
            }
            WorkflowEvent::Finished(WorkflowOutcome::Failed { error }) => {
                warn!(error = %error, "Workflow reported failure");
                return Dispatch::Finished(Err(StageFailure::new(Stage::InvokeWorkflow, error)));
            }
            WorkflowEvent::Ping => {}
            WorkflowEvent::Unrecognized { kind } => debug!(kind = %kind, "Ignoring workflow event"),
        }
        Dispatch::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::testing::sse_frame;
    use futures::stream;
    use serde_json::json;
    use std::sync::Arc;

    fn chunked(text: &str, size: usize) -> ChunkStream {
        let chunks: Vec<Result<Vec<u8>, _>> = text.as_bytes().chunks(size).map(|c| Ok(c.to_vec())).collect();
        stream::iter(chunks).boxed()
    }

    fn channel() -> (Arc<CollectingSink>, ProgressChannel) {
        let sink = Arc::new(CollectingSink::new());
        (sink.clone(), ProgressChannel::new(sink))
    }

    #[tokio::test]
    async fn test_success_collects_outputs_and_usage() {
        let body = [
            sse_frame("workflow_started", &json!({"workflow_run_id": "wr-1", "task_id": "t-1"})),
            sse_frame("node_started", &json!({"data": {"title": "LLM"}})),
            sse_frame("text_chunk", &json!({"data": {"text": "x"}})),
            sse_frame("node_finished", &json!({"data": {"title": "LLM"}})),
            sse_frame(
                "workflow_finished",
                &json!({"data": {"status": "succeeded", "outputs": {"text": "hello"}, "total_tokens": 7}}),
            ),
        ]
        .concat();
        let (sink, channel) = channel();

        let result = EventDispatcher::new(&channel).run(chunked(&body, 7)).await.unwrap();
        assert_eq!(result.workflow_run_id.as_deref(), Some("wr-1"));
        assert_eq!(result.outputs.get("text"), Some(&json!("hello")));
        assert_eq!(result.usage.total_tokens, Some(7));
        assert_eq!(result.frames, 5);
        assert_eq!(sink.percents(), vec![40, 43, 46]);
    }

    #[tokio::test]
    async fn test_failure_is_verbatim() {
        let body = sse_frame(
            "workflow_finished",
            &json!({"data": {"status": "failed", "error": "quota exceeded"}}),
        );
        let (_sink, channel) = channel();

        let failure = EventDispatcher::new(&channel).run(chunked(&body, 3)).await.unwrap_err();
        assert_eq!(failure.message, "quota exceeded");
        assert_eq!(failure.stage, Stage::InvokeWorkflow);
    }

    #[tokio::test]
    async fn test_node_progress_is_capped() {
        let mut body = String::new();
        for _ in 0..30 {
            body.push_str(&sse_frame("node_started", &json!({"data": {"title": "n"}})));
        }
        body.push_str(&sse_frame("workflow_finished", &json!({"data": {"status": "succeeded"}})));
        let (sink, channel) = channel();

        EventDispatcher::new(&channel).run(chunked(&body, 64)).await.unwrap();
        assert_eq!(sink.percents().last(), Some(&NODE_PERCENT_CAP));
    }

    #[tokio::test]
    async fn test_final_frame_without_trailing_blank_line() {
        let body = "event: workflow_finished\ndata: {\"data\": {\"status\": \"succeeded\"}}";
        let (_sink, channel) = channel();
        assert!(EventDispatcher::new(&channel).run(chunked(body, 10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_stream_without_finish_fails() {
        let body = sse_frame("workflow_started", &json!({}));
        let (_sink, channel) = channel();
        let failure = EventDispatcher::new(&channel).run(chunked(&body, 5)).await.unwrap_err();
        assert!(failure.message.contains("without a finished event"));
    }

    #[tokio::test]
    async fn test_transport_error_fails_stage() {
        let chunks: Vec<Result<Vec<u8>, crate::errors::ServiceError>> = vec![
            Ok(b"event: ping\ndata: {}\n\n".to_vec()),
            Err(crate::errors::ServiceError::Transport("connection reset".to_string())),
        ];
        let (_sink, channel) = channel();
        let failure = EventDispatcher::new(&channel)
            .run(stream::iter(chunks).boxed())
            .await
            .unwrap_err();
        assert!(failure.message.contains("connection reset"));
    }
}
