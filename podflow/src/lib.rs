//! # Podflow
//!
//! An execution pipeline that turns an uploaded spreadsheet of papers into a
//! generated podcast script and synthesized audio, streaming live progress to
//! the client that started the run.
//!
//! A run moves through a fixed sequence of stages:
//!
//! - **Ingest / Validate**: accept the upload, parse rows, derive idempotency keys
//! - **PersistRecords**: insert new rows into the record store, skipping known keys
//! - **InvokeWorkflow**: upload the file and consume the streamed workflow response
//! - **MaterializeArtifact**: write the script (segments or raw text) to the run directory
//! - **SynthesizeAudio**: run the synthesis worker as a subprocess
//! - **UploadArtifacts**: upload audio and update records, one item at a time
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use podflow::prelude::*;
//!
//! let config = Arc::new(PodflowConfig::from_env()?);
//! let orchestrator = Arc::new(PipelineOrchestrator::from_config(config)?);
//!
//! let mut handle = orchestrator.launch(RunRequest::new(artifact));
//! while let Some(frame) = handle.frames.recv().await {
//!     print!("{frame}");
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod framing;
pub mod ingest;
pub mod observability;
pub mod pipeline;
pub mod services;
pub mod synthesis;
pub mod testing;
pub mod upload;
pub mod utils;

#[cfg(feature = "server")]
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancelReason, CancellationMonitor, CancellationToken, CleanupRegistry};
    pub use crate::config::PodflowConfig;
    pub use crate::core::{
        ArtifactBatchItem, FramedEvent, ItemError, ItemOutcome, ProgressNotification, Stage, WorkflowEvent,
    };
    pub use crate::errors::{PodflowError, ServiceError, StageFailure, ValidationError};
    pub use crate::events::{CollectingSink, NotificationSink, ProgressChannel, StreamSink};
    pub use crate::framing::{parse_lenient, FrameReassembler, LineReassembler};
    pub use crate::ingest::{DelimitedRowParser, RowParser, UploadedArtifact};
    pub use crate::pipeline::{
        PersistSummary, PipelineOrchestrator, RunContext, RunHandle, RunReport, RunRequest, RunStatus,
    };
    pub use crate::services::{ObjectStorage, RecordStore, Services, WorkflowClient};
    pub use crate::synthesis::{ExternalProcessAdapter, Synthesizer, WorkerEvent};
    pub use crate::upload::{UploadCoordinator, UploadSummary};
    pub use crate::utils::{generate_run_id, iso_timestamp, Timestamp};
    pub use std::sync::Arc;
}
