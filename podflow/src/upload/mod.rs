//! Upload of generated artifacts to object storage.

mod coordinator;

pub use coordinator::{UploadCoordinator, UploadProgress, UploadSummary, AUDIO_CONTENT_TYPE};
