//! Frame and line reassembly over chunked transports.

use tracing::{debug, warn};

use super::buffer::DelimitedBuffer;
use super::quotes::parse_lenient;
use crate::core::FramedEvent;

const FRAME_DELIMITER: &[u8] = b"\n\n";
const LINE_DELIMITER: &[u8] = b"\n";

/// Turns a chunked, blank-line-framed text stream into [`FramedEvent`]s.
///
/// Each chunk is appended to an internal buffer; every fully delimited frame
/// is parsed and emitted in arrival order, and the undelimited tail waits for
/// the next chunk. Frames without a payload are dropped silently; payloads
/// that fail to parse are logged and dropped. Neither aborts the stream.
#[derive(Debug, Clone)]
pub struct FrameReassembler {
    buffer: DelimitedBuffer,
    emitted: u64,
    dropped: u64,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReassembler {
    /// Creates an empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: DelimitedBuffer::new(FRAME_DELIMITER),
            emitted: 0,
            dropped: 0,
        }
    }

    /// Appends a chunk and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<FramedEvent> {
        let segments = self.buffer.push(chunk);
        let mut events = Vec::with_capacity(segments.len());
        for segment in segments {
            if let Some(event) = self.parse_segment(&segment) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes the trailing frame at end of stream.
    ///
    /// A stream that closes without a final blank line still ends its last
    /// frame; mid-stream the remainder is never emitted.
    pub fn finish(&mut self) -> Option<FramedEvent> {
        let remainder = self.buffer.take_remainder()?;
        self.parse_segment(&remainder)
    }

    /// Number of bytes waiting for a delimiter.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.pending()
    }

    /// Number of frames emitted so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Number of frames dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn parse_segment(&mut self, segment: &[u8]) -> Option<FramedEvent> {
        let text = String::from_utf8_lossy(segment);
        match parse_frame(&text) {
            Ok(Some(event)) => {
                self.emitted += 1;
                Some(event)
            }
            Ok(None) => {
                if !text.trim().is_empty() {
                    self.dropped += 1;
                    debug!(frame = %text, "Dropping frame without payload");
                }
                None
            }
            Err(e) => {
                self.dropped += 1;
                warn!(error = %e, frame = %text, "Dropping frame with malformed payload");
                None
            }
        }
    }
}

/// Parses one delimited frame.
///
/// Recognized fields are `event:` (the kind) and `data:` (the payload; repeated
/// data lines are joined with newlines). Comment lines starting with `:` and
/// other fields are ignored. When no `event:` line is present the kind falls
/// back to the payload's own `event` field, then to `"message"`.
///
/// Returns `Ok(None)` for frames with no payload.
///
/// # Errors
///
/// Returns the parse error when the payload is not structured data even after
/// quote normalization.
pub fn parse_frame(text: &str) -> Result<Option<FramedEvent>, serde_json::Error> {
    let mut kind: Option<String> = None;
    let mut data: Option<String> = None;

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field.trim() {
            "event" => kind = Some(value.trim().to_string()),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    let Some(data) = data else {
        return Ok(None);
    };
    let payload = parse_lenient(&data)?;
    let kind = kind
        .filter(|k| !k.is_empty())
        .or_else(|| {
            payload
                .get("event")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "message".to_string());

    Ok(Some(FramedEvent::new(kind, payload)))
}

/// Newline-delimited variant used for subprocess output streams.
#[derive(Debug, Clone)]
pub struct LineReassembler {
    buffer: DelimitedBuffer,
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReassembler {
    /// Creates an empty line reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: DelimitedBuffer::new(LINE_DELIMITER),
        }
    }

    /// Appends a chunk and returns every complete line, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .push(chunk)
            .into_iter()
            .map(|line| String::from_utf8_lossy(&line).into_owned())
            .collect()
    }

    /// Returns the unterminated last line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        self.buffer
            .take_remainder()
            .map(|line| String::from_utf8_lossy(&line).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const STREAM: &str = concat!(
        "event: workflow_started\ndata: {\"workflow_run_id\": \"r1\"}\n\n",
        ": keep-alive comment\n\n",
        "event: node_started\ndata: {\"data\": {\"title\": \"编写脚本\"}}\n\n",
        "data: {\"event\": \"node_finished\", \"data\": {\"title\": \"LLM\"}}\n\n",
        "event: workflow_finished\ndata: {\"data\": {\"status\": \"succeeded\"}}\n\n",
    );

    fn collect_all(chunks: &[&[u8]]) -> Vec<FramedEvent> {
        let mut r = FrameReassembler::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(r.push(chunk));
        }
        out.extend(r.finish());
        out
    }

    #[test]
    fn test_parses_whole_stream() {
        let events = collect_all(&[STREAM.as_bytes()]);
        let kinds: Vec<_> = events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["workflow_started", "node_started", "node_finished", "workflow_finished"]);
        assert_eq!(events[1].payload, json!({"data": {"title": "编写脚本"}}));
    }

    #[test]
    fn test_every_two_way_split_matches_unsplit() {
        let bytes = STREAM.as_bytes();
        let expected = collect_all(&[bytes]);
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(collect_all(&[a, b]), expected, "split at byte {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time_matches_unsplit() {
        let bytes = STREAM.as_bytes();
        let expected = collect_all(&[bytes]);
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(collect_all(&chunks), expected);
    }

    #[test]
    fn test_partial_frame_is_buffered_not_emitted() {
        let mut r = FrameReassembler::new();
        assert!(r.push(b"event: ping\ndata: {\"a\":").is_empty());
        assert!(r.pending_bytes() > 0);
        let events = r.push(b" 1}\n\n");
        assert_eq!(events, vec![FramedEvent::new("ping", json!({"a": 1}))]);
    }

    #[test]
    fn test_frame_without_payload_is_dropped_silently() {
        let mut r = FrameReassembler::new();
        assert!(r.push(b"event: node_started\nid: 7\n\n").is_empty());
        assert_eq!(r.dropped(), 1);
    }

    #[test]
    fn test_malformed_payload_is_dropped_and_stream_continues() {
        let mut r = FrameReassembler::new();
        let events = r.push(b"event: a\ndata: {not json\n\nevent: b\ndata: {}\n\n");
        assert_eq!(events, vec![FramedEvent::new("b", json!({}))]);
        assert_eq!(r.dropped(), 1);
        assert_eq!(r.emitted(), 1);
    }

    #[test]
    fn test_single_quoted_payload_is_tolerated() {
        let frame = parse_frame("event: workflow_finished\ndata: {'status': 'succeeded'}").unwrap();
        assert_eq!(frame, Some(FramedEvent::new("workflow_finished", json!({"status": "succeeded"}))));
    }

    #[test]
    fn test_line_reassembler_splits_on_newlines() {
        let mut lines = LineReassembler::new();
        assert_eq!(lines.push(b"[Gen] one\n[OK] [1/"), vec!["[Gen] one".to_string()]);
        assert_eq!(lines.push(b"2] done\r\n"), vec!["[OK] [1/2] done".to_string()]);
        lines.push(b"tail");
        assert_eq!(lines.finish(), Some("tail".to_string()));
    }
}
