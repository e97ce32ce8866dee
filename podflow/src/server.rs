//! HTTP surface: one streaming pipeline endpoint and a health check.

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info};

use crate::ingest::UploadedArtifact;
use crate::pipeline::{PipelineOrchestrator, RunHandle, RunRequest};

/// Query parameters of `POST /api/pipeline/run`.
#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    /// Name of the uploaded file; its extension declares the type.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Skip audio synthesis and upload.
    #[serde(default)]
    pub skip_audio: bool,
    /// Routing identifier for the synthesis worker.
    #[serde(default)]
    pub channel_id: Option<String>,
}

impl RunQuery {
    fn into_request(self, content_type: Option<String>, body: Bytes) -> RunRequest {
        let artifact = match self.file_name {
            None if body.is_empty() => None,
            name => Some(UploadedArtifact::new(
                name.unwrap_or_default(),
                content_type,
                body.to_vec(),
            )),
        };
        RunRequest {
            artifact,
            skip_audio: self.skip_audio,
            channel_id: None,
        }
        .with_channel_id(self.channel_id)
    }
}

/// Builds the application router.
pub fn router(orchestrator: Arc<PipelineOrchestrator>) -> Router {
    let body_limit = orchestrator.config().max_upload_bytes;
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/api/pipeline/run", post(run_pipeline))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(orchestrator)
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, orchestrator: Arc<PipelineOrchestrator>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn run_pipeline(
    State(orchestrator): State<Arc<PipelineOrchestrator>>,
    Query(query): Query<RunQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let request = query.into_request(content_type, body);

    let RunHandle {
        run_id,
        frames,
        completion,
    } = orchestrator.launch(request);
    info!(run_id = %run_id, "Accepted pipeline run");

    tokio::spawn(async move {
        match completion.wait().await {
            Ok((report, monitor)) => {
                info!(run_id = %report.run_id, status = %report.status, monitor = ?monitor, "Pipeline run closed");
            }
            Err(e) => error!(run_id = %run_id, error = %e, "Pipeline run task aborted"),
        }
    });

    let stream = UnboundedReceiverStream::new(frames).map(Ok::<_, Infallible>);
    (
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PodflowConfig;
    use crate::ingest::DelimitedRowParser;
    use crate::services::Services;
    use crate::testing::{InMemoryObjectStorage, InMemoryRecordStore, ScriptedSynthesizer, ScriptedWorkflowClient};

    async fn spawn_server(dir: &std::path::Path) -> String {
        let config = Arc::new(PodflowConfig::default().with_output_root(dir));
        let services = Services {
            records: Arc::new(InMemoryRecordStore::new("arxiv_id")),
            storage: Arc::new(InMemoryObjectStorage::new()),
            workflow: Arc::new(ScriptedWorkflowClient::finishing_with("Plain script text")),
        };
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            config,
            services,
            Arc::new(DelimitedRowParser),
            Arc::new(ScriptedSynthesizer::producing(&[])),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, orchestrator, std::future::pending()));
        format!("http://{addr}")
    }

    #[test]
    fn test_query_without_body_has_no_artifact() {
        let request = RunQuery::default().into_request(None, Bytes::new());
        assert!(request.artifact.is_none());

        let query = RunQuery {
            file_name: Some("p.csv".to_string()),
            skip_audio: true,
            channel_id: Some(String::new()),
        };
        let request = query.into_request(Some("text/csv".to_string()), Bytes::from_static(b"a\n1\n"));
        assert_eq!(request.artifact.unwrap().file_name, "p.csv");
        assert!(request.skip_audio);
        assert!(request.channel_id.is_none());
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_server(dir.path()).await;
        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_upload_streams_single_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_server(dir.path()).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/pipeline/run"))
            .send()
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get("content-type").unwrap().to_str().unwrap(),
            "text/event-stream"
        );
        let body = resp.text().await.unwrap();
        assert!(body.starts_with("event: error\n"));
        assert!(body.contains("No file uploaded"));
        assert_eq!(body.matches("event: ").count(), 1);
    }

    #[tokio::test]
    async fn test_csv_upload_streams_to_success() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_server(dir.path()).await;

        let body = reqwest::Client::new()
            .post(format!("{base}/api/pipeline/run?file_name=papers.csv&skip_audio=true"))
            .header("content-type", "text/csv")
            .body("arxiv_id,title\n2401.1,One\n")
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        assert!(body.contains("event: progress\n"));
        assert!(body.contains("format_fallback"));
        assert!(body.trim_end().lines().rev().nth(1).unwrap().starts_with("event: success"));
    }
}
