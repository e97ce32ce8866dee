//! Spreadsheet rows and the parser boundary.

use serde::{Deserialize, Serialize};

use super::input::{ArtifactKind, UploadedArtifact};
use crate::errors::ValidationError;

/// One data row keyed by header name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRow {
    /// Zero-based position among the data rows.
    pub index: usize,
    /// Non-empty cells by header name.
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl InputRow {
    /// Creates a row from string cells.
    #[must_use]
    pub fn from_pairs<'a>(index: usize, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        Self { index, fields }
    }

    /// Returns a cell rendered as trimmed text, if present and non-empty.
    #[must_use]
    pub fn text(&self, column: &str) -> Option<String> {
        let text = match self.fields.get(column)? {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Null => return None,
            other => other.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Converts an uploaded spreadsheet into rows.
pub trait RowParser: Send + Sync {
    /// Parses the artifact. An artifact with no data rows is an error.
    fn parse(&self, artifact: &UploadedArtifact, kind: ArtifactKind) -> Result<Vec<InputRow>, ValidationError>;
}

/// Built-in parser for delimited text (CSV and TSV) with a header row.
///
/// Quoted fields may contain delimiters, doubled quotes and line breaks.
/// Workbook formats are rejected; plug in another [`RowParser`] for those.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedRowParser;

impl RowParser for DelimitedRowParser {
    fn parse(&self, artifact: &UploadedArtifact, kind: ArtifactKind) -> Result<Vec<InputRow>, ValidationError> {
        let delimiter = match kind {
            ArtifactKind::Csv => ',',
            ArtifactKind::Tsv => '\t',
            ArtifactKind::Xlsx | ArtifactKind::Xls => {
                return Err(ValidationError::Unparsable(format!(
                    "{kind} workbooks are not supported by the delimited parser"
                )))
            }
        };
        let text = std::str::from_utf8(&artifact.bytes)
            .map_err(|e| ValidationError::Unparsable(format!("not valid UTF-8: {e}")))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut records = split_records(text, delimiter)?.into_iter();
        let headers: Vec<String> = records
            .next()
            .ok_or(ValidationError::NoRows)?
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.iter().all(String::is_empty) {
            return Err(ValidationError::Unparsable("header row is empty".to_string()));
        }

        let rows: Vec<InputRow> = records
            .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()))
            .enumerate()
            .map(|(index, cells)| {
                InputRow::from_pairs(
                    index,
                    headers
                        .iter()
                        .zip(cells.iter())
                        .filter(|(h, c)| !h.is_empty() && !c.trim().is_empty())
                        .map(|(h, c)| (h.as_str(), c.trim())),
                )
            })
            .collect();

        if rows.is_empty() {
            return Err(ValidationError::NoRows);
        }
        Ok(rows)
    }
}

fn split_records(text: &str, delimiter: char) -> Result<Vec<Vec<String>>, ValidationError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(ValidationError::Unparsable("unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn csv(text: &str) -> UploadedArtifact {
        UploadedArtifact::new("papers.csv", None, text.as_bytes().to_vec())
    }

    #[test]
    fn test_parses_header_and_rows() {
        let rows = DelimitedRowParser
            .parse(&csv("arxiv_id,title\n2401.00001,First\n2401.00002,Second\n"), ArtifactKind::Csv)
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].index, 1);
        assert_eq!(rows[0].fields.get("title"), Some(&json!("First")));
        assert_eq!(rows[1].text("arxiv_id").as_deref(), Some("2401.00002"));
    }

    #[test]
    fn test_quoted_fields() {
        let rows = DelimitedRowParser
            .parse(
                &csv("\u{feff}title,abstract\r\n\"A, B\",\"He said \"\"hi\"\"\nnext line\"\r\n"),
                ArtifactKind::Csv,
            )
            .unwrap();

        assert_eq!(rows[0].text("title").as_deref(), Some("A, B"));
        assert_eq!(rows[0].text("abstract").as_deref(), Some("He said \"hi\"\nnext line"));
    }

    #[test]
    fn test_tsv_and_blank_rows() {
        let artifact = UploadedArtifact::new("p.tsv", None, b"id\ttitle\n\n1\tOne\n\t\n".to_vec());
        let rows = DelimitedRowParser.parse(&artifact, ArtifactKind::Tsv).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_header_only_is_no_rows() {
        assert_eq!(
            DelimitedRowParser.parse(&csv("id,title\n"), ArtifactKind::Csv),
            Err(ValidationError::NoRows)
        );
    }

    #[test]
    fn test_workbook_is_unparsable() {
        let artifact = UploadedArtifact::new("p.xlsx", None, b"PK".to_vec());
        assert!(matches!(
            DelimitedRowParser.parse(&artifact, ArtifactKind::Xlsx),
            Err(ValidationError::Unparsable(_))
        ));
    }

    #[test]
    fn test_unterminated_quote() {
        assert!(matches!(
            DelimitedRowParser.parse(&csv("a\n\"open\n"), ArtifactKind::Csv),
            Err(ValidationError::Unparsable(_))
        ));
    }
}
