//! External collaborators, specified at their interface boundary.
//!
//! Each collaborator is a trait so the orchestrator can be driven by the
//! HTTP implementations in production and by in-memory doubles in tests.
//! Every call is single-shot; errors are plain [`ServiceError`] messages.

mod object_storage;
mod record_store;
mod workflow;

pub use object_storage::HttpObjectStorage;
pub use record_store::PostgrestRecordStore;
pub use workflow::{HttpWorkflowClient, WorkflowRunRequest};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::config::PodflowConfig;
use crate::errors::{PodflowError, ServiceError};

/// A stream of raw response chunks.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, ServiceError>>;

/// Row-oriented record store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the record whose key column equals `key`, if any.
    async fn find_by_key(&self, key: &str) -> Result<Option<serde_json::Value>, ServiceError>;

    /// Inserts one record.
    async fn insert(&self, record: &serde_json::Map<String, serde_json::Value>) -> Result<(), ServiceError>;

    /// Updates fields on the record whose key column equals `key`.
    async fn update(
        &self,
        key: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), ServiceError>;
}

/// Durable object storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `bytes` at `path`, overwriting, and returns the public reference.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, ServiceError>;
}

/// Generative workflow service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Uploads the input file and returns its service-side identifier.
    async fn upload_file(&self, file_name: &str, content_type: &str, bytes: Vec<u8>) -> Result<String, ServiceError>;

    /// Starts a streaming run and returns the raw chunk stream.
    async fn run_streaming(&self, request: WorkflowRunRequest) -> Result<ChunkStream, ServiceError>;
}

/// The collaborators one orchestrator talks to.
#[derive(Clone)]
pub struct Services {
    /// Record store.
    pub records: Arc<dyn RecordStore>,
    /// Object storage.
    pub storage: Arc<dyn ObjectStorage>,
    /// Workflow service.
    pub workflow: Arc<dyn WorkflowClient>,
}

impl Services {
    /// Builds the HTTP-backed collaborators from config.
    pub fn http(config: &Arc<PodflowConfig>) -> Result<Self, PodflowError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| PodflowError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            records: Arc::new(PostgrestRecordStore::new(client.clone(), config.clone())),
            storage: Arc::new(HttpObjectStorage::new(client.clone(), config.clone())),
            workflow: Arc::new(HttpWorkflowClient::new(client, config.clone())),
        })
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// Turns a non-success response into [`ServiceError::Http`] with its body text.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Http {
        status: status.as_u16(),
        body,
    })
}
