//! Writing the generated script to the run directory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::Stage;
use crate::errors::StageFailure;
use crate::framing::parse_lenient;

/// Structured script artifact, the worker's input format.
pub const SCRIPT_JSON_FILE: &str = "podcast_script.json";
/// Raw-text fallback artifact.
pub const SCRIPT_TEXT_FILE: &str = "podcast_script.md";
/// Title-to-key mapping read back by the worker.
pub const MAPPING_FILE: &str = "arxiv_mapping.json";

const MAPPING_TITLE_CHARS: usize = 50;

/// How the generated script was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFormat {
    /// Parsed into titled segments.
    Segments,
    /// Stored unmodified.
    RawText,
}

impl fmt::Display for ScriptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Segments => write!(f, "segments"),
            Self::RawText => write!(f, "raw_text"),
        }
    }
}

/// One titled script segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSegment {
    /// Segment title.
    pub title: String,
    /// Segment body.
    pub script: String,
}

/// The persisted script artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedScript {
    /// Path of the artifact handed to the worker.
    pub path: PathBuf,
    /// Structured or raw.
    pub format: ScriptFormat,
    /// Number of segments written; 1 for raw text.
    pub segments: usize,
    /// Entries in the title mapping file; 0 when none was written.
    pub mapping_entries: usize,
}

/// Picks the generated script text out of the workflow outputs.
///
/// Prefers `output_key`, then the first string-valued output. A structured
/// value under `output_key` is re-serialized.
pub fn select_output(
    outputs: &serde_json::Map<String, serde_json::Value>,
    output_key: &str,
) -> Result<String, StageFailure> {
    match outputs.get(output_key) {
        Some(serde_json::Value::String(text)) => return Ok(text.clone()),
        Some(value) if !value.is_null() => return Ok(value.to_string()),
        _ => {}
    }
    outputs
        .values()
        .find_map(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| {
            StageFailure::new(
                Stage::MaterializeArtifact,
                format!("workflow produced no text output (expected '{output_key}')"),
            )
        })
}

/// Parses `text` into segments, tolerating single-quoted payloads.
///
/// Returns `None` when the text is not a non-empty sequence of segments.
#[must_use]
pub fn parse_segments(text: &str) -> Option<Vec<ScriptSegment>> {
    let value = parse_lenient(text).ok()?;
    let items = value.as_array()?;
    if items.is_empty() {
        return None;
    }

    let mut segments = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let segment = match item {
            serde_json::Value::String(body) => ScriptSegment {
                title: format!("segment_{}", idx + 1),
                script: body.clone(),
            },
            serde_json::Value::Object(map) => {
                let body = map
                    .get("script")
                    .or_else(|| map.get("body"))
                    .and_then(serde_json::Value::as_str)?;
                let title = map
                    .get("title")
                    .and_then(serde_json::Value::as_str)
                    .map_or_else(|| format!("segment_{}", idx + 1), str::to_string);
                ScriptSegment {
                    title,
                    script: body.to_string(),
                }
            }
            _ => return None,
        };
        segments.push(segment);
    }
    Some(segments)
}

/// The mapping key for a segment title.
#[must_use]
pub fn mapping_title(title: &str) -> String {
    title.replace(' ', "_").chars().take(MAPPING_TITLE_CHARS).collect()
}

/// Writes the script artifact into `dir`.
///
/// Parsed segments go to [`SCRIPT_JSON_FILE`] together with a title mapping
/// built from `row_keys` by index. Anything else is written unchanged to
/// [`SCRIPT_TEXT_FILE`] with no mapping.
pub async fn materialize(dir: &Path, text: &str, row_keys: &[String]) -> Result<MaterializedScript, StageFailure> {
    let io_failure = |what: &str, e: std::io::Error| {
        StageFailure::new(Stage::MaterializeArtifact, format!("failed to write {what}: {e}"))
    };

    let Some(segments) = parse_segments(text) else {
        let path = dir.join(SCRIPT_TEXT_FILE);
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| io_failure(SCRIPT_TEXT_FILE, e))?;
        info!(path = %path.display(), bytes = text.len(), "Script stored as raw text");
        return Ok(MaterializedScript {
            path,
            format: ScriptFormat::RawText,
            segments: 1,
            mapping_entries: 0,
        });
    };

    let mut mapping = serde_json::Map::new();
    for (segment, key) in segments.iter().zip(row_keys) {
        let title = mapping_title(&segment.title);
        match mapping.get(&title) {
            Some(kept) => warn!(
                title = %title,
                kept = %kept,
                dropped = %key,
                "Duplicate segment title, mapping keeps the first row"
            ),
            None => {
                mapping.insert(title, serde_json::Value::String(key.clone()));
            }
        }
    }
    let mapped = segments.len().min(row_keys.len());
    if mapping.len() < mapped {
        warn!(
            mapped,
            entries = mapping.len(),
            "Title mapping lost entries to duplicate titles"
        );
    }
    if segments.len() != row_keys.len() {
        debug!(
            segments = segments.len(),
            rows = row_keys.len(),
            "Segment count differs from row count"
        );
    }

    let path = dir.join(SCRIPT_JSON_FILE);
    let body = serde_json::to_vec_pretty(&segments)
        .map_err(|e| StageFailure::new(Stage::MaterializeArtifact, e.to_string()))?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| io_failure(SCRIPT_JSON_FILE, e))?;

    let mapping_entries = mapping.len();
    if mapping_entries > 0 {
        let body = serde_json::to_vec_pretty(&mapping)
            .map_err(|e| StageFailure::new(Stage::MaterializeArtifact, e.to_string()))?;
        tokio::fs::write(dir.join(MAPPING_FILE), body)
            .await
            .map_err(|e| io_failure(MAPPING_FILE, e))?;
    }

    info!(path = %path.display(), segments = segments.len(), mapping_entries, "Script stored");
    Ok(MaterializedScript {
        path,
        format: ScriptFormat::Segments,
        segments: segments.len(),
        mapping_entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_single_quoted_wrap_parses() {
        let segments = parse_segments(r#"'[{"title":"T","script":"S"}]'"#).unwrap();
        assert_eq!(
            segments,
            vec![ScriptSegment {
                title: "T".to_string(),
                script: "S".to_string()
            }]
        );
    }

    #[test]
    fn test_python_literal_and_body_field() {
        let segments = parse_segments("[{'title': 'A', 'body': 'first'}, 'loose text']").unwrap();
        assert_eq!(segments[0].script, "first");
        assert_eq!(segments[1].title, "segment_2");
    }

    #[test]
    fn test_prose_is_not_segments() {
        assert!(parse_segments("Welcome to today's episode.").is_none());
        assert!(parse_segments("[]").is_none());
        assert!(parse_segments(r#"[{"title": "no body"}]"#).is_none());
    }

    #[test]
    fn test_mapping_title_truncates() {
        let long = "a b".repeat(30);
        let key = mapping_title(&long);
        assert_eq!(key.chars().count(), 50);
        assert!(!key.contains(' '));
    }

    #[test]
    fn test_select_output_prefers_configured_key() {
        let outputs = json!({"summary": "x", "text": "y"});
        let outputs = outputs.as_object().unwrap();
        assert_eq!(select_output(outputs, "text").unwrap(), "y");
        assert_eq!(select_output(outputs, "missing").unwrap(), "x");
        assert!(select_output(&serde_json::Map::new(), "text").is_err());
    }

    #[tokio::test]
    async fn test_segments_write_script_and_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let keys = vec!["2401.00001".to_string()];

        let script = materialize(dir.path(), r#"'[{"title":"T","script":"S"}]'"#, &keys)
            .await
            .unwrap();
        assert_eq!(script.format, ScriptFormat::Segments);
        assert_eq!(script.mapping_entries, 1);

        let mapping: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(MAPPING_FILE)).unwrap()).unwrap();
        assert_eq!(mapping, json!({"T": "2401.00001"}));
        let written: Vec<ScriptSegment> = serde_json::from_slice(&std::fs::read(&script.path).unwrap()).unwrap();
        assert_eq!(written.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_titles_keep_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let keys = vec!["2401.00001".to_string(), "2401.00002".to_string()];
        let text = r#"[{"title": "Same", "script": "one"}, {"title": "Same", "script": "two"}]"#;

        let script = materialize(dir.path(), text, &keys).await.unwrap();
        assert_eq!(script.segments, 2);
        assert_eq!(script.mapping_entries, 1);

        let mapping: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(MAPPING_FILE)).unwrap()).unwrap();
        assert_eq!(mapping, json!({"Same": "2401.00001"}));
    }

    #[tokio::test]
    async fn test_raw_text_fallback_is_unmodified() {
        let dir = tempfile::tempdir().unwrap();
        let text = "Host: hello 'world'\n\n[not json";

        let script = materialize(dir.path(), text, &[]).await.unwrap();
        assert_eq!(script.format, ScriptFormat::RawText);
        assert_eq!(std::fs::read_to_string(&script.path).unwrap(), text);
        assert!(!dir.path().join(MAPPING_FILE).exists());
    }
}
