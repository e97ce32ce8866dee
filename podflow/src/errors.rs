//! Error types for the podflow pipeline.
//!
//! Errors are split along the pipeline's propagation policy:
//! - [`ValidationError`]: rejected input, terminates a run before any stage runs
//! - [`StageFailure`]: fatal stage errors carrying the upstream text or exit code
//! - [`ServiceError`]: string-message errors from external collaborators
//!
//! Per-row and per-item failures are not errors at all; they are recorded as
//! [`crate::core::ItemError`] values and surface in the terminal notification.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::core::Stage;

/// The main error type for podflow operations.
#[derive(Debug, Error)]
pub enum PodflowError {
    /// The uploaded input was rejected.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A pipeline stage failed.
    #[error("{0}")]
    Stage(#[from] StageFailure),

    /// An external service call failed.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// An illegal stage transition was attempted.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// Configuration could not be loaded or is incomplete.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when the uploaded artifact fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No file was attached to the request.
    #[error("No file uploaded")]
    MissingArtifact,

    /// The uploaded file is empty.
    #[error("Uploaded file '{file_name}' is empty")]
    EmptyArtifact {
        /// The uploaded file name.
        file_name: String,
    },

    /// The declared type is not a supported spreadsheet type.
    #[error("Unsupported file type '{declared}' for '{file_name}', expected one of: .xlsx, .xls, .csv, .tsv")]
    UnsupportedType {
        /// The uploaded file name.
        file_name: String,
        /// The declared content type.
        declared: String,
    },

    /// The spreadsheet could not be parsed into rows.
    #[error("Failed to parse spreadsheet: {0}")]
    Unparsable(String),

    /// The spreadsheet has a header but no data rows.
    #[error("Spreadsheet contains no data rows")]
    NoRows,
}

/// A fatal stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} failed: {message}")]
pub struct StageFailure {
    /// The stage that failed.
    pub stage: Stage,
    /// The failure message, verbatim from upstream where applicable.
    pub message: String,
    /// The subprocess exit code, for synthesis failures.
    pub exit_code: Option<i32>,
}

impl StageFailure {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            exit_code: None,
        }
    }

    /// Creates a failure for a subprocess that exited non-zero.
    #[must_use]
    pub fn exit_code(stage: Stage, code: i32, stderr_tail: Option<&str>) -> Self {
        let message = match stderr_tail {
            Some(tail) if !tail.is_empty() => {
                format!("worker exited with code {code}: {tail}")
            }
            _ => format!("worker exited with code {code}"),
        };
        Self {
            stage,
            message,
            exit_code: Some(code),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("stage".to_string(), serde_json::json!(self.stage.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.message));
        if let Some(code) = self.exit_code {
            map.insert("exit_code".to_string(), serde_json::json!(code));
        }
        map
    }
}

/// Errors reported by external collaborators.
///
/// Services report plain string messages and no retry contract is assumed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ServiceError {
    /// The service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// The HTTP status code.
        status: u16,
        /// The response body text.
        body: String,
    },

    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The service rejected the call for a domain reason.
    #[error("{0}")]
    Rejected(String),
}

impl ServiceError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Error raised when the stage machine is driven backwards or re-entered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal stage transition: {from} -> {to}")]
pub struct TransitionError {
    /// The current stage.
    pub from: Stage,
    /// The requested stage.
    pub to: Stage,
}
