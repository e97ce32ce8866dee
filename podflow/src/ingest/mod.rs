//! Input ingestion: artifact validation, row parsing and idempotency keys.

mod input;
mod keys;
mod rows;

pub use input::{validate_artifact, ArtifactKind, UploadedArtifact};
pub use keys::{idempotency_key, record_for};
pub use rows::{DelimitedRowParser, InputRow, RowParser};
