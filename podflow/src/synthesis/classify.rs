//! Ordered tag rules for worker output lines.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A classified line of worker standard output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// The worker started generating an item.
    GenerationProgress {
        /// The raw line.
        line: String,
    },
    /// The worker finished item `index` of `total`.
    GenerationComplete {
        /// One-based item position.
        index: u32,
        /// Number of items in the batch.
        total: u32,
        /// The raw line.
        line: String,
    },
    /// The worker gave up on item `index` of `total`.
    GenerationFailed {
        /// One-based item position.
        index: u32,
        /// Number of items in the batch.
        total: u32,
        /// The raw line.
        line: String,
    },
    /// The worker reported an upload step.
    UploadProgress {
        /// The raw line.
        line: String,
    },
    /// The worker reported a database update step.
    DatabaseUpdate {
        /// The raw line.
        line: String,
    },
    /// No rule matched.
    Unclassified {
        /// The raw line.
        line: String,
    },
}

/// What a matching rule classifies a line as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    /// `[Gen]`
    GenerationProgress,
    /// `[OK] [i/n]`
    GenerationComplete,
    /// `[ERROR] [i/n]`
    GenerationFailed,
    /// `[Upload]`
    UploadProgress,
    /// `[DB]`
    DatabaseUpdate,
}

#[derive(Debug, Clone)]
struct LineRule {
    pattern: Regex,
    tag: LineTag,
}

/// An ordered list of (pattern, tag) rules. The first match wins.
#[derive(Debug, Clone)]
pub struct LineClassifier {
    rules: Vec<LineRule>,
}

impl LineClassifier {
    /// Builds a classifier from ordered `(pattern, tag)` pairs.
    ///
    /// Patterns for the positional tags capture the item index and total as
    /// groups 1 and 2.
    pub fn new(rules: &[(&str, LineTag)]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(pattern, tag)| Ok(LineRule { pattern: Regex::new(pattern)?, tag: *tag }))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// The rules for the speech-synthesis worker's output.
    pub fn standard() -> Result<Self, regex::Error> {
        Self::new(&[
            (r"\[OK\]\s*\[(\d+)/(\d+)\]", LineTag::GenerationComplete),
            (r"\[ERROR\]\s*\[(\d+)/(\d+)\]", LineTag::GenerationFailed),
            (r"\[Gen\]", LineTag::GenerationProgress),
            (r"\[Upload\]", LineTag::UploadProgress),
            (r"\[DB\]", LineTag::DatabaseUpdate),
        ])
    }

    /// Classifies one line.
    #[must_use]
    pub fn classify(&self, line: &str) -> WorkerEvent {
        let line_owned = || line.trim().to_string();
        for rule in &self.rules {
            let Some(captures) = rule.pattern.captures(line) else {
                continue;
            };
            let position = |group: usize| {
                captures
                    .get(group)
                    .and_then(|m| m.as_str().parse::<u32>().ok())
                    .unwrap_or(0)
            };
            return match rule.tag {
                LineTag::GenerationProgress => WorkerEvent::GenerationProgress { line: line_owned() },
                LineTag::GenerationComplete => WorkerEvent::GenerationComplete {
                    index: position(1),
                    total: position(2),
                    line: line_owned(),
                },
                LineTag::GenerationFailed => WorkerEvent::GenerationFailed {
                    index: position(1),
                    total: position(2),
                    line: line_owned(),
                },
                LineTag::UploadProgress => WorkerEvent::UploadProgress { line: line_owned() },
                LineTag::DatabaseUpdate => WorkerEvent::DatabaseUpdate { line: line_owned() },
            };
        }
        WorkerEvent::Unclassified { line: line_owned() }
    }
}
