//! Speech synthesis through an external worker process.
//!
//! This module provides:
//! - [`ExternalProcessAdapter`], which spawns and supervises the worker
//! - [`LineClassifier`], the ordered tag rules for its output lines
//! - [`SynthesisResultFile`], the worker's JSON result file

mod adapter;
mod classify;
mod result;

pub use adapter::{ExternalProcessAdapter, SynthesisOutcome, SynthesisRequest, Synthesizer, WorkerEventSink};
pub use classify::{LineClassifier, LineTag, WorkerEvent};
pub use result::{ResultEntry, SynthesisResultFile, RESULT_FILE_NAME};
