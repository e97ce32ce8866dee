//! In-memory collaborators for testing.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::core::{ArtifactBatchItem, Stage};
use crate::errors::{ServiceError, StageFailure};
use crate::services::{ChunkStream, ObjectStorage, RecordStore, WorkflowClient, WorkflowRunRequest};
use crate::synthesis::{SynthesisOutcome, SynthesisRequest, Synthesizer, WorkerEvent, WorkerEventSink};

type Record = serde_json::Map<String, serde_json::Value>;

/// A record store backed by a vector, keyed by one column.
///
/// Inserting a key that already exists fails like a unique constraint would.
#[derive(Debug)]
pub struct InMemoryRecordStore {
    key_column: String,
    records: Mutex<Vec<Record>>,
    failing_keys: Mutex<HashSet<String>>,
    inserts: Mutex<usize>,
}

impl InMemoryRecordStore {
    /// Creates an empty store keyed by `key_column`.
    #[must_use]
    pub fn new(key_column: impl Into<String>) -> Self {
        Self {
            key_column: key_column.into(),
            records: Mutex::new(Vec::new()),
            failing_keys: Mutex::new(HashSet::new()),
            inserts: Mutex::new(0),
        }
    }

    /// Seeds a record with only its key set.
    #[must_use]
    pub fn with_existing(self, key: &str) -> Self {
        let mut record = Record::new();
        record.insert(self.key_column.clone(), serde_json::json!(key));
        self.records.lock().push(record);
        self
    }

    /// Makes inserts and updates for `key` fail.
    #[must_use]
    pub fn failing_for(self, key: &str) -> Self {
        self.failing_keys.lock().insert(key.to_string());
        self
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true when no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Number of successful inserts.
    #[must_use]
    pub fn insert_count(&self) -> usize {
        *self.inserts.lock()
    }

    /// Returns the record with `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Record> {
        self.records
            .lock()
            .iter()
            .find(|r| self.key_of(r) == Some(key))
            .cloned()
    }

    fn key_of<'a>(&self, record: &'a Record) -> Option<&'a str> {
        record.get(&self.key_column).and_then(serde_json::Value::as_str)
    }

    fn check_failing(&self, key: &str) -> Result<(), ServiceError> {
        if self.failing_keys.lock().contains(key) {
            return Err(ServiceError::Http {
                status: 500,
                body: format!("simulated failure for {key}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_by_key(&self, key: &str) -> Result<Option<serde_json::Value>, ServiceError> {
        Ok(self.get(key).map(serde_json::Value::Object))
    }

    async fn insert(&self, record: &Record) -> Result<(), ServiceError> {
        let key = self
            .key_of(record)
            .ok_or_else(|| ServiceError::rejected(format!("record has no '{}'", self.key_column)))?
            .to_string();
        self.check_failing(&key)?;
        if self.get(&key).is_some() {
            return Err(ServiceError::Http {
                status: 409,
                body: format!("duplicate key value: {key}"),
            });
        }
        self.records.lock().push(record.clone());
        *self.inserts.lock() += 1;
        Ok(())
    }

    async fn update(&self, key: &str, fields: &Record) -> Result<(), ServiceError> {
        self.check_failing(key)?;
        let mut records = self.records.lock();
        let Some(record) = records
            .iter_mut()
            .find(|r| r.get(&self.key_column).and_then(serde_json::Value::as_str) == Some(key))
        else {
            return Err(ServiceError::rejected(format!("no record with key {key}")));
        };
        for (name, value) in fields {
            record.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

/// Object storage backed by a map from path to bytes.
#[derive(Debug, Default)]
pub struct InMemoryObjectStorage {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    failing_fragments: Mutex<Vec<String>>,
}

impl InMemoryObjectStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects uploads whose path contains `fragment`.
    #[must_use]
    pub fn failing_for(self, fragment: &str) -> Self {
        self.failing_fragments.lock().push(fragment.to_string());
        self
    }

    /// Stored paths in order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Content type stored for `path`.
    #[must_use]
    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects.lock().get(path).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, ServiceError> {
        if self.failing_fragments.lock().iter().any(|f| path.contains(f.as_str())) {
            return Err(ServiceError::Http {
                status: 403,
                body: "bucket policy denied upload".to_string(),
            });
        }
        self.objects
            .lock()
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(format!("memory://{path}"))
    }
}

/// A workflow client replaying a fixed streamed response.
///
/// The body is split into small chunks so frames cross chunk boundaries.
/// [`ScriptedWorkflowClient::entered`] is notified when a run starts; with a
/// gate set, the run waits for the gate before returning its stream.
#[derive(Debug)]
pub struct ScriptedWorkflowClient {
    body: String,
    chunk_size: usize,
    upload_error: Option<String>,
    run_error: Option<String>,
    entered: Arc<Notify>,
    gate: Option<Arc<Notify>>,
    uploads: Mutex<Vec<(String, String)>>,
    runs: Mutex<Vec<WorkflowRunRequest>>,
}

impl ScriptedWorkflowClient {
    /// Replays `body` verbatim.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            chunk_size: 17,
            upload_error: None,
            run_error: None,
            entered: Arc::new(Notify::new()),
            gate: None,
            uploads: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
        }
    }

    /// A run that succeeds with `text` as its `text` output.
    #[must_use]
    pub fn finishing_with(text: &str) -> Self {
        Self::new(super::fixtures::workflow_success_body(text))
    }

    /// A run whose finished event reports `error`.
    #[must_use]
    pub fn failing_with(error: &str) -> Self {
        Self::new(super::fixtures::workflow_failure_body(error))
    }

    /// Makes the file upload fail.
    #[must_use]
    pub fn with_upload_error(mut self, message: impl Into<String>) -> Self {
        self.upload_error = Some(message.into());
        self
    }

    /// Makes the run call fail.
    #[must_use]
    pub fn with_run_error(mut self, message: impl Into<String>) -> Self {
        self.run_error = Some(message.into());
        self
    }

    /// Holds the run until `gate` is notified.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sets the replay chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Notified when a run call arrives.
    #[must_use]
    pub fn entered(&self) -> Arc<Notify> {
        Arc::clone(&self.entered)
    }

    /// `(file_name, content_type)` of every upload.
    #[must_use]
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().clone()
    }

    /// Every run request received.
    #[must_use]
    pub fn runs(&self) -> Vec<WorkflowRunRequest> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl WorkflowClient for ScriptedWorkflowClient {
    async fn upload_file(&self, file_name: &str, content_type: &str, _bytes: Vec<u8>) -> Result<String, ServiceError> {
        self.uploads
            .lock()
            .push((file_name.to_string(), content_type.to_string()));
        match &self.upload_error {
            Some(message) => Err(ServiceError::Transport(message.clone())),
            None => Ok("file-1".to_string()),
        }
    }

    async fn run_streaming(&self, request: WorkflowRunRequest) -> Result<ChunkStream, ServiceError> {
        self.runs.lock().push(request);
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.run_error {
            return Err(ServiceError::Http {
                status: 400,
                body: message.clone(),
            });
        }
        let chunks: Vec<Result<Vec<u8>, ServiceError>> = self
            .body
            .as_bytes()
            .chunks(self.chunk_size)
            .map(|c| Ok(c.to_vec()))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// A synthesizer that writes one placeholder audio file per key.
#[derive(Debug)]
pub struct ScriptedSynthesizer {
    keys: Vec<String>,
    exit_code: Option<i32>,
    requests: Mutex<Vec<SynthesisRequest>>,
}

impl ScriptedSynthesizer {
    /// Produces one item per key.
    #[must_use]
    pub fn producing(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| (*k).to_string()).collect(),
            exit_code: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fails as a worker exiting with `code`.
    #[must_use]
    pub fn exiting_with(code: i32) -> Self {
        Self {
            keys: Vec::new(),
            exit_code: Some(code),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received.
    #[must_use]
    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(
        &self,
        request: SynthesisRequest,
        on_event: WorkerEventSink<'_>,
    ) -> Result<SynthesisOutcome, StageFailure> {
        self.requests.lock().push(request.clone());
        if let Some(code) = self.exit_code {
            return Err(StageFailure::exit_code(Stage::SynthesizeAudio, code, None));
        }

        let total = u32::try_from(self.keys.len()).unwrap_or(u32::MAX);
        let mut items = Vec::with_capacity(self.keys.len());
        for (idx, key) in self.keys.iter().enumerate() {
            let path = request.output_dir.join(format!("{key}.mp3"));
            tokio::fs::write(&path, b"ID3")
                .await
                .map_err(|e| StageFailure::new(Stage::SynthesizeAudio, e.to_string()))?;
            let index = u32::try_from(idx + 1).unwrap_or(u32::MAX);
            on_event(WorkerEvent::GenerationComplete {
                index,
                total,
                line: format!("[OK] [{index}/{total}] {key}"),
            });
            items.push(ArtifactBatchItem::new(key.clone(), path).with_channel_id(request.channel_id.clone()));
        }

        Ok(SynthesisOutcome {
            items,
            result_file_found: true,
            reported_failed: 0,
            worker_elapsed: Some(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_store_rejects_duplicates() {
        let store = InMemoryRecordStore::new("arxiv_id").with_existing("a");
        let mut record = Record::new();
        record.insert("arxiv_id".to_string(), serde_json::json!("a"));

        assert!(store.insert(&record).await.is_err());
        assert_eq!(store.len(), 1);
        assert!(store.find_by_key("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_record_store_update_merges_fields() {
        let store = InMemoryRecordStore::new("arxiv_id").with_existing("a");
        let mut fields = Record::new();
        fields.insert("audio_url".to_string(), serde_json::json!("memory://x"));

        store.update("a", &fields).await.unwrap();
        assert_eq!(store.get("a").unwrap()["audio_url"], serde_json::json!("memory://x"));
        assert!(store.update("missing", &fields).await.is_err());
    }

    #[tokio::test]
    async fn test_object_storage_failure_fragment() {
        let storage = InMemoryObjectStorage::new().failing_for("bad");
        assert!(storage.upload("audio/bad.mp3", vec![1], "audio/mpeg").await.is_err());
        assert_eq!(
            storage.upload("audio/ok.mp3", vec![1], "audio/mpeg").await.unwrap(),
            "memory://audio/ok.mp3"
        );
        assert_eq!(storage.paths(), vec!["audio/ok.mp3".to_string()]);
    }
}
