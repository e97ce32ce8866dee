//! Runtime configuration.
//!
//! [`PodflowConfig`] is built once at process start and shared as an
//! `Arc<PodflowConfig>` with every component. Values come from `PODFLOW_*`
//! environment variables; unset keys fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::PodflowError;

/// Environment variable prefix for all keys.
pub const ENV_PREFIX: &str = "PODFLOW_";

/// Runtime configuration data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodflowConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Largest accepted upload, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Root of the per-run output directory tree.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Base URL of the generative workflow service (e.g. `https://api.dify.ai/v1`).
    #[serde(default)]
    pub workflow_base_url: String,
    /// API key for the workflow service.
    #[serde(default)]
    pub workflow_api_key: String,
    /// End-user identifier sent with workflow calls.
    #[serde(default = "default_workflow_user")]
    pub workflow_user: String,
    /// Workflow input variable that receives the uploaded file.
    #[serde(default = "default_workflow_file_variable")]
    pub workflow_file_variable: String,
    /// Workflow output variable holding the generated script.
    #[serde(default = "default_workflow_output_key")]
    pub workflow_output_key: String,

    /// Base URL of the record store and object storage project.
    #[serde(default)]
    pub record_store_url: String,
    /// Service key for the record store and object storage.
    #[serde(default)]
    pub record_store_key: String,
    /// Table that receives one record per input row.
    #[serde(default = "default_record_table")]
    pub record_table: String,
    /// Column holding the idempotency key.
    #[serde(default = "default_record_key_column")]
    pub record_key_column: String,

    /// Object storage bucket for audio artifacts.
    #[serde(default = "default_storage_bucket")]
    pub storage_bucket: String,
    /// Path prefix inside the bucket.
    #[serde(default = "default_storage_path_prefix")]
    pub storage_path_prefix: String,
    /// Record column updated with the artifact's public reference.
    #[serde(default = "default_audio_url_column")]
    pub audio_url_column: String,

    /// Interpreter used to launch the synthesis worker.
    #[serde(default = "default_synthesis_program")]
    pub synthesis_program: String,
    /// Script reference passed as the worker's first argument.
    #[serde(default = "default_synthesis_script")]
    pub synthesis_script: String,
    /// Routing identifier used when a request does not carry one.
    #[serde(default)]
    pub default_channel_id: Option<String>,

    /// Timeout for non-streaming HTTP calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Budget for removing a run's temporary files, in seconds.
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_seconds: u64,

    /// `tracing-subscriber` filter directive.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Emit JSON log lines instead of the human-readable format.
    #[serde(default)]
    pub log_json: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_output_root() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_workflow_user() -> String {
    "podflow".to_string()
}

fn default_workflow_file_variable() -> String {
    "file".to_string()
}

fn default_workflow_output_key() -> String {
    "text".to_string()
}

fn default_record_table() -> String {
    "papers".to_string()
}

fn default_record_key_column() -> String {
    "arxiv_id".to_string()
}

fn default_storage_bucket() -> String {
    "podcasts".to_string()
}

fn default_storage_path_prefix() -> String {
    "audio".to_string()
}

fn default_audio_url_column() -> String {
    "audio_url".to_string()
}

fn default_synthesis_program() -> String {
    "python3".to_string()
}

fn default_synthesis_script() -> String {
    "podcast_generator/produce_podcast.py".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_cleanup_timeout() -> u64 {
    5
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for PodflowConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_upload_bytes: default_max_upload_bytes(),
            output_root: default_output_root(),
            workflow_base_url: String::new(),
            workflow_api_key: String::new(),
            workflow_user: default_workflow_user(),
            workflow_file_variable: default_workflow_file_variable(),
            workflow_output_key: default_workflow_output_key(),
            record_store_url: String::new(),
            record_store_key: String::new(),
            record_table: default_record_table(),
            record_key_column: default_record_key_column(),
            storage_bucket: default_storage_bucket(),
            storage_path_prefix: default_storage_path_prefix(),
            audio_url_column: default_audio_url_column(),
            synthesis_program: default_synthesis_program(),
            synthesis_script: default_synthesis_script(),
            default_channel_id: None,
            request_timeout_seconds: default_request_timeout(),
            cleanup_timeout_seconds: default_cleanup_timeout(),
            log_filter: default_log_filter(),
            log_json: false,
        }
    }
}

/// Logging settings handed to [`crate::observability::init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive.
    pub filter: String,
    /// JSON output.
    pub json: bool,
}

impl PodflowConfig {
    /// Builds the config from `PODFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, PodflowError> {
        envy::prefixed(ENV_PREFIX)
            .from_env::<Self>()
            .map_err(|e| PodflowError::Config(format!("error building config from env: {e}")))
    }

    /// Builds the config from explicit key/value pairs (keys include the prefix).
    pub fn from_pairs<I>(pairs: I) -> Result<Self, PodflowError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX)
            .from_iter::<_, Self>(pairs)
            .map_err(|e| PodflowError::Config(format!("error building config: {e}")))
    }

    /// Checks that the live service endpoints are usable.
    pub fn validate(&self) -> Result<(), PodflowError> {
        let required = [
            ("workflow_base_url", &self.workflow_base_url),
            ("workflow_api_key", &self.workflow_api_key),
            ("record_store_url", &self.record_store_url),
            ("record_store_key", &self.record_store_key),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(PodflowError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }
        for (name, url) in [
            ("workflow_base_url", &self.workflow_base_url),
            ("record_store_url", &self.record_store_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(PodflowError::Config(format!("{name} must be an http(s) URL, got '{url}'")));
            }
        }
        if self.workflow_output_key.is_empty() || self.record_key_column.is_empty() {
            return Err(PodflowError::Config(
                "workflow_output_key and record_key_column must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the output root.
    #[must_use]
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    /// Sets the synthesis worker command.
    #[must_use]
    pub fn with_synthesis_command(mut self, program: impl Into<String>, script: impl Into<String>) -> Self {
        self.synthesis_program = program.into();
        self.synthesis_script = script.into();
        self
    }

    /// Sets the default routing identifier.
    #[must_use]
    pub fn with_default_channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.default_channel_id = Some(channel_id.into());
        self
    }

    /// Returns the logging settings.
    #[must_use]
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            filter: self.log_filter.clone(),
            json: self.log_json,
        }
    }

    /// Returns the HTTP request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Returns the temporary-file cleanup budget.
    #[must_use]
    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_seconds)
    }

    /// Trims a trailing slash from a base URL.
    pub(crate) fn base(url: &str) -> &str {
        url.trim_end_matches('/')
    }
}
