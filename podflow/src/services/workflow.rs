//! Streaming generative workflow client.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{check_status, ChunkStream, WorkflowClient};
use crate::config::PodflowConfig;
use crate::errors::ServiceError;

/// Body of a streaming workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunRequest {
    /// Workflow input variables.
    pub inputs: serde_json::Map<String, serde_json::Value>,
    /// Always `"streaming"`.
    pub response_mode: String,
    /// End-user identifier.
    pub user: String,
}

impl WorkflowRunRequest {
    /// Builds a request whose file variable references an uploaded file.
    #[must_use]
    pub fn with_uploaded_file(file_variable: &str, file_id: &str, user: &str) -> Self {
        let mut inputs = serde_json::Map::new();
        inputs.insert(
            file_variable.to_string(),
            serde_json::json!({
                "transfer_method": "local_file",
                "upload_file_id": file_id,
                "type": "document",
            }),
        );
        Self {
            inputs,
            response_mode: "streaming".to_string(),
            user: user.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

/// Workflow client for the `/files/upload` + `/workflows/run` API.
#[derive(Debug, Clone)]
pub struct HttpWorkflowClient {
    client: Client,
    config: Arc<PodflowConfig>,
}

impl HttpWorkflowClient {
    /// Creates a workflow client from a shared client and config.
    #[must_use]
    pub fn new(client: Client, config: Arc<PodflowConfig>) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", PodflowConfig::base(&self.config.workflow_base_url))
    }
}

#[async_trait]
impl WorkflowClient for HttpWorkflowClient {
    async fn upload_file(&self, file_name: &str, content_type: &str, bytes: Vec<u8>) -> Result<String, ServiceError> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| ServiceError::rejected(format!("invalid content type '{content_type}': {e}")))?;
        let form = Form::new()
            .part("file", part)
            .text("user", self.config.workflow_user.clone());

        let response = self
            .client
            .post(self.url("/files/upload"))
            .bearer_auth(&self.config.workflow_api_key)
            .timeout(self.config.request_timeout())
            .multipart(form)
            .send()
            .await?;
        let uploaded: UploadedFile = check_status(response).await?.json().await?;
        debug!(file_id = %uploaded.id, file_name, "Uploaded workflow input file");
        Ok(uploaded.id)
    }

    async fn run_streaming(&self, request: WorkflowRunRequest) -> Result<ChunkStream, ServiceError> {
        // No overall timeout: the stream lasts as long as the workflow runs.
        let response = self
            .client
            .post(self.url("/workflows/run"))
            .bearer_auth(&self.config.workflow_api_key)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ServiceError::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_request_shape() {
        let request = WorkflowRunRequest::with_uploaded_file("file", "f-1", "podflow");
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["response_mode"], json!("streaming"));
        assert_eq!(value["inputs"]["file"]["upload_file_id"], json!("f-1"));
        assert_eq!(value["user"], json!("podflow"));
    }

    #[test]
    fn test_url_join() {
        let config = Arc::new(PodflowConfig {
            workflow_base_url: "https://api.dify.ai/v1/".to_string(),
            ..PodflowConfig::default()
        });
        let client = HttpWorkflowClient::new(Client::new(), config);
        assert_eq!(client.url("/workflows/run"), "https://api.dify.ai/v1/workflows/run");
    }
}
