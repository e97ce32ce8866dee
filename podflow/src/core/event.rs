//! Upstream workflow events.
//!
//! A [`FramedEvent`] is the raw unit reassembled from the upstream stream.
//! [`WorkflowEvent`] is its typed interpretation over the small fixed set of
//! kinds the pipeline reacts to.

use serde::{Deserialize, Serialize};

/// A parsed frame from the upstream event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramedEvent {
    /// Free-form event kind (e.g. "workflow_started", "node_finished").
    pub kind: String,
    /// Structured payload data.
    pub payload: serde_json::Value,
}

impl FramedEvent {
    /// Creates a new framed event.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Returns the nested `data` object if present, else the payload itself.
    fn body(&self) -> &serde_json::Value {
        match self.payload.get("data") {
            Some(data) if data.is_object() => data,
            _ => &self.payload,
        }
    }
}

/// Usage metrics reported by the workflow service on completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    /// Total tokens consumed by the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Upstream-reported elapsed seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<f64>,
    /// Number of workflow steps executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u64>,
}

/// Final outcome carried by a finished event.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    /// The workflow succeeded and produced outputs.
    Succeeded {
        /// Output variables by name.
        outputs: serde_json::Map<String, serde_json::Value>,
        /// Usage metrics, if reported.
        usage: UsageMetrics,
    },
    /// The workflow failed; the text is reported verbatim.
    Failed {
        /// Upstream error text.
        error: String,
    },
}

/// Typed interpretation of a [`FramedEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// The upstream run was accepted.
    Started {
        /// The upstream workflow run identifier.
        workflow_run_id: Option<String>,
        /// The upstream task identifier.
        task_id: Option<String>,
    },
    /// A workflow node started or finished.
    NodeProgress {
        /// Node title, if reported.
        title: Option<String>,
        /// True for a node-finished event.
        finished: bool,
    },
    /// The workflow reached a terminal state.
    Finished(WorkflowOutcome),
    /// Keep-alive.
    Ping,
    /// Any kind outside the recognized set.
    Unrecognized {
        /// The raw kind string.
        kind: String,
    },
}

impl From<&FramedEvent> for WorkflowEvent {
    fn from(frame: &FramedEvent) -> Self {
        let body = frame.body();
        match frame.kind.as_str() {
            "workflow_started" | "started" => Self::Started {
                workflow_run_id: string_field(&frame.payload, "workflow_run_id")
                    .or_else(|| string_field(body, "id")),
                task_id: string_field(&frame.payload, "task_id"),
            },
            "node_started" | "node_progress" => Self::NodeProgress {
                title: string_field(body, "title"),
                finished: false,
            },
            "node_finished" => Self::NodeProgress {
                title: string_field(body, "title"),
                finished: true,
            },
            "workflow_finished" | "finished" => Self::Finished(finished_outcome(body)),
            "error" => Self::Finished(WorkflowOutcome::Failed {
                error: string_field(body, "message")
                    .or_else(|| string_field(body, "error"))
                    .unwrap_or_else(|| "workflow stream reported an error".to_string()),
            }),
            "ping" => Self::Ping,
            other => Self::Unrecognized {
                kind: other.to_string(),
            },
        }
    }
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn finished_outcome(body: &serde_json::Value) -> WorkflowOutcome {
    let status = body.get("status").and_then(serde_json::Value::as_str);
    let succeeded = match status {
        Some(s) => matches!(s, "succeeded" | "success" | "completed"),
        None => body
            .get("success")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or_else(|| body.get("error").map_or(true, serde_json::Value::is_null)),
    };

    if succeeded {
        let outputs = body
            .get("outputs")
            .and_then(serde_json::Value::as_object)
            .cloned()
            .unwrap_or_default();
        WorkflowOutcome::Succeeded {
            outputs,
            usage: UsageMetrics {
                total_tokens: body.get("total_tokens").and_then(serde_json::Value::as_u64),
                elapsed_time: body.get("elapsed_time").and_then(serde_json::Value::as_f64),
                total_steps: body.get("total_steps").and_then(serde_json::Value::as_u64),
            },
        }
    } else {
        let error = string_field(body, "error")
            .or_else(|| string_field(body, "message"))
            .unwrap_or_else(|| format!("workflow finished with status {}", status.unwrap_or("unknown")));
        WorkflowOutcome::Failed { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_started_reads_run_id() {
        let frame = FramedEvent::new(
            "workflow_started",
            json!({"task_id": "t-1", "workflow_run_id": "run-9", "data": {"id": "run-9"}}),
        );
        assert_eq!(
            WorkflowEvent::from(&frame),
            WorkflowEvent::Started {
                workflow_run_id: Some("run-9".to_string()),
                task_id: Some("t-1".to_string()),
            }
        );
    }

    #[test]
    fn test_finished_success_carries_outputs_and_usage() {
        let frame = FramedEvent::new(
            "workflow_finished",
            json!({"data": {"status": "succeeded", "outputs": {"text": "hi"}, "total_tokens": 42, "elapsed_time": 1.5}}),
        );
        match WorkflowEvent::from(&frame) {
            WorkflowEvent::Finished(WorkflowOutcome::Succeeded { outputs, usage }) => {
                assert_eq!(outputs.get("text"), Some(&json!("hi")));
                assert_eq!(usage.total_tokens, Some(42));
                assert_eq!(usage.elapsed_time, Some(1.5));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_finished_failure_keeps_error_verbatim() {
        let frame = FramedEvent::new(
            "workflow_finished",
            json!({"data": {"status": "failed", "error": "quota exceeded"}}),
        );
        assert_eq!(
            WorkflowEvent::from(&frame),
            WorkflowEvent::Finished(WorkflowOutcome::Failed {
                error: "quota exceeded".to_string()
            })
        );
    }

    #[test]
    fn test_finished_without_status_uses_success_flag() {
        let frame = FramedEvent::new("finished", json!({"success": false, "error": "bad input"}));
        assert!(matches!(
            WorkflowEvent::from(&frame),
            WorkflowEvent::Finished(WorkflowOutcome::Failed { .. })
        ));
    }

    #[test]
    fn test_unknown_kind_is_unrecognized() {
        let frame = FramedEvent::new("text_chunk", json!({"text": "x"}));
        assert_eq!(
            WorkflowEvent::from(&frame),
            WorkflowEvent::Unrecognized {
                kind: "text_chunk".to_string()
            }
        );
    }

    #[test]
    fn test_error_kind_is_failed_outcome() {
        let frame = FramedEvent::new("error", json!({"status": 400, "message": "invalid param"}));
        assert_eq!(
            WorkflowEvent::from(&frame),
            WorkflowEvent::Finished(WorkflowOutcome::Failed {
                error: "invalid param".to_string()
            })
        );
    }
}
