//! Lenient structured-data parsing for upstream payloads.
//!
//! The workflow service sometimes renders its result as a single-quoted
//! literal instead of strict JSON, either as a whole-payload wrap
//! (`'[{"title": "T"}]'`) or as Python-literal style strings
//! (`[{'title': 'T'}]`). Parsing tries strict JSON first and only then
//! translates quote style.

use std::borrow::Cow;

/// Parses `text` as JSON, falling back to quote-style normalization.
///
/// # Errors
///
/// Returns the error of the final (normalized) parse attempt.
pub fn parse_lenient(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    serde_json::from_str(&normalize_quotes(trimmed))
}

/// Translates single-quoted literals into strict JSON syntax.
#[must_use]
pub fn normalize_quotes(text: &str) -> Cow<'_, str> {
    let trimmed = text.trim();
    let inner = strip_wrapping_quotes(trimmed);
    if inner.len() != trimmed.len() && serde_json::from_str::<serde_json::Value>(inner).is_ok() {
        return Cow::Borrowed(inner);
    }
    Cow::Owned(translate(inner))
}

fn strip_wrapping_quotes(text: &str) -> &str {
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        let inner = text[1..text.len() - 1].trim();
        if inner.starts_with('[') || inner.starts_with('{') {
            return inner;
        }
    }
    text
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Double,
    Single,
}

fn translate(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut state = Quote::None;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Quote::None => match c {
                '"' => {
                    state = Quote::Double;
                    out.push('"');
                }
                '\'' => {
                    state = Quote::Single;
                    out.push('"');
                }
                c if c.is_ascii_alphabetic() => {
                    let mut word = String::from(c);
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '_' {
                            word.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    out.push_str(match word.as_str() {
                        "True" => "true",
                        "False" => "false",
                        "None" => "null",
                        other => other,
                    });
                }
                c => out.push(c),
            },
            Quote::Double => {
                out.push(c);
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else if c == '"' {
                    state = Quote::None;
                }
            }
            Quote::Single => match c {
                '\\' => match chars.next() {
                    Some('\'') => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => out.push_str("\\\\"),
                },
                '"' => out.push_str("\\\""),
                '\'' => {
                    state = Quote::None;
                    out.push('"');
                }
                '\n' => out.push_str("\\n"),
                c => out.push(c),
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strict_json_passes_through() {
        assert_eq!(parse_lenient(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_whole_payload_single_quote_wrap() {
        let value = parse_lenient(r#"'[{"title":"T","script":"S"}]'"#).unwrap();
        assert_eq!(value, json!([{"title": "T", "script": "S"}]));
    }

    #[test]
    fn test_python_literal_style() {
        let value = parse_lenient("[{'title': 'It\\'s \"live\"', 'ok': True, 'n': None}]").unwrap();
        assert_eq!(value, json!([{"title": "It's \"live\"", "ok": true, "n": null}]));
    }

    #[test]
    fn test_double_quoted_apostrophes_are_untouched() {
        let value = parse_lenient("[{'title': \"Don't stop\"}]").unwrap();
        assert_eq!(value, json!([{"title": "Don't stop"}]));
    }

    #[test]
    fn test_plain_text_still_fails() {
        assert!(parse_lenient("[S1]Hello there.[S2]Hi!").is_err());
    }
}
