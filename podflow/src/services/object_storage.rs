//! Bucket-style object storage over HTTP.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;

use super::{check_status, ObjectStorage};
use crate::config::PodflowConfig;
use crate::errors::ServiceError;

/// Object storage using the `/storage/v1/object/{bucket}/{path}` protocol.
///
/// Uploads are sent with `x-upsert: true`, so re-uploading a path overwrites it.
#[derive(Debug, Clone)]
pub struct HttpObjectStorage {
    client: Client,
    config: Arc<PodflowConfig>,
}

impl HttpObjectStorage {
    /// Creates a storage client from a shared client and config.
    #[must_use]
    pub fn new(client: Client, config: Arc<PodflowConfig>) -> Self {
        Self { client, config }
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            PodflowConfig::base(&self.config.record_store_url),
            self.config.storage_bucket,
            path.trim_start_matches('/')
        )
    }

    /// Returns the public reference for an object path.
    #[must_use]
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            PodflowConfig::base(&self.config.record_store_url),
            self.config.storage_bucket,
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(self.object_url(path))
            .header("apikey", &self.config.record_store_key)
            .bearer_auth(&self.config.record_store_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .timeout(self.config.request_timeout())
            .body(bytes)
            .send()
            .await?;
        check_status(response).await?;
        Ok(self.public_url(path))
    }
}
