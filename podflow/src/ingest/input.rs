//! The uploaded artifact and its type check.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::errors::ValidationError;

/// The spreadsheet kinds a run accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Office Open XML workbook.
    Xlsx,
    /// Legacy Excel workbook.
    Xls,
    /// Comma-separated values.
    Csv,
    /// Tab-separated values.
    Tsv,
}

impl ArtifactKind {
    /// Resolves a kind from a file extension (without the dot).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xlsx" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            _ => None,
        }
    }

    /// Resolves a kind from a MIME type, ignoring parameters.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some(Self::Xlsx),
            "application/vnd.ms-excel" => Some(Self::Xls),
            "text/csv" | "application/csv" => Some(Self::Csv),
            "text/tab-separated-values" => Some(Self::Tsv),
            _ => None,
        }
    }

    /// The canonical MIME type.
    #[must_use]
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Xls => "application/vnd.ms-excel",
            Self::Csv => "text/csv",
            Self::Tsv => "text/tab-separated-values",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xlsx => write!(f, "xlsx"),
            Self::Xls => write!(f, "xls"),
            Self::Csv => write!(f, "csv"),
            Self::Tsv => write!(f, "tsv"),
        }
    }
}

/// A spreadsheet uploaded by the client.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedArtifact {
    /// The client-supplied file name.
    pub file_name: String,
    /// The declared content type, if any.
    pub content_type: Option<String>,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

impl fmt::Debug for UploadedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedArtifact")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl UploadedArtifact {
    /// Creates an artifact.
    #[must_use]
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.filter(|c| !c.trim().is_empty()),
            bytes,
        }
    }

    /// Returns the file name reduced to a safe final path component.
    #[must_use]
    pub fn safe_file_name(&self) -> String {
        let base = Path::new(&self.file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let cleaned: String = base
            .chars()
            .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect();
        if cleaned.trim_matches('.').is_empty() {
            "upload".to_string()
        } else {
            cleaned
        }
    }

    fn extension(&self) -> Option<&str> {
        Path::new(&self.file_name).extension().and_then(|e| e.to_str())
    }
}

/// Checks presence, non-emptiness and declared type.
///
/// The file extension decides the kind when it is recognized; otherwise a
/// recognized declared MIME type does. Generic MIME types such as
/// `application/octet-stream` defer to the extension.
pub fn validate_artifact(artifact: Option<&UploadedArtifact>) -> Result<ArtifactKind, ValidationError> {
    let artifact = artifact.ok_or(ValidationError::MissingArtifact)?;
    if artifact.file_name.trim().is_empty() && artifact.bytes.is_empty() {
        return Err(ValidationError::MissingArtifact);
    }
    if artifact.bytes.is_empty() {
        return Err(ValidationError::EmptyArtifact {
            file_name: artifact.file_name.clone(),
        });
    }

    artifact
        .extension()
        .and_then(ArtifactKind::from_extension)
        .or_else(|| artifact.content_type.as_deref().and_then(ArtifactKind::from_mime))
        .ok_or_else(|| ValidationError::UnsupportedType {
            file_name: artifact.file_name.clone(),
            declared: artifact
                .content_type
                .clone()
                .or_else(|| artifact.extension().map(|e| format!(".{e}")))
                .unwrap_or_else(|| "unknown".to_string()),
        })
}
