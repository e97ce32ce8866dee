//! Test fixtures: upstream frames, uploads and fake workers.

use serde_json::json;
use std::path::{Path, PathBuf};

use crate::ingest::UploadedArtifact;

/// Encodes one upstream frame.
#[must_use]
pub fn sse_frame(kind: &str, payload: &serde_json::Value) -> String {
    format!("event: {kind}\ndata: {payload}\n\n")
}

/// A full upstream body ending in a successful finish with `text` as output.
#[must_use]
pub fn workflow_success_body(text: &str) -> String {
    [
        sse_frame("workflow_started", &json!({"task_id": "task-1", "workflow_run_id": "wr-1"})),
        sse_frame("node_started", &json!({"data": {"title": "Read papers"}})),
        sse_frame("node_finished", &json!({"data": {"title": "Read papers"}})),
        sse_frame("ping", &json!({})),
        sse_frame(
            "workflow_finished",
            &json!({"data": {
                "status": "succeeded",
                "outputs": {"text": text},
                "total_tokens": 321,
                "elapsed_time": 4.2,
            }}),
        ),
    ]
    .concat()
}

/// A full upstream body whose finish reports `error`.
#[must_use]
pub fn workflow_failure_body(error: &str) -> String {
    [
        sse_frame("workflow_started", &json!({"task_id": "task-1", "workflow_run_id": "wr-1"})),
        sse_frame(
            "workflow_finished",
            &json!({"data": {"status": "failed", "error": error}}),
        ),
    ]
    .concat()
}

/// A CSV upload with an `arxiv_id,title` header and one row per pair.
#[must_use]
pub fn csv_upload(rows: &[(&str, &str)]) -> UploadedArtifact {
    let mut body = String::from("arxiv_id,title\n");
    for (key, title) in rows {
        body.push_str(&format!("{key},\"{title}\"\n"));
    }
    UploadedArtifact::new("papers.csv", Some("text/csv".to_string()), body.into_bytes())
}

/// Writes a shell worker script into `dir` and returns its path.
///
/// The worker receives `--script <path> --output-dir <dir> [--channel-id <id>]`,
/// so `$2` is the script path and `$4` the output directory.
pub fn write_fake_worker(dir: &Path, body: &str) -> std::io::Result<PathBuf> {
    let path = dir.join("fake_worker.sh");
    std::fs::write(&path, format!("#!/bin/sh\nset -e\n{body}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FrameReassembler;

    #[test]
    fn test_success_body_reassembles() {
        let mut reassembler = FrameReassembler::new();
        let frames = reassembler.push(workflow_success_body("hi").as_bytes());
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[4].kind, "workflow_finished");
    }

    #[test]
    fn test_csv_upload_quotes_titles() {
        let upload = csv_upload(&[("2401.1", "A, B")]);
        let text = String::from_utf8(upload.bytes).unwrap();
        assert!(text.ends_with("2401.1,\"A, B\"\n"));
    }
}
