//! Testing utilities for podflow pipelines.
//!
//! This module provides:
//! - In-memory record store, object storage and workflow client
//! - A scripted synthesizer and a fake worker script writer
//! - Assertions over delivered notifications

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_failed, assert_has_status, assert_percents_non_decreasing, assert_sequence_contiguous,
    assert_single_terminal, assert_succeeded,
};
pub use fixtures::{csv_upload, sse_frame, workflow_failure_body, workflow_success_body, write_fake_worker};
pub use mocks::{InMemoryObjectStorage, InMemoryRecordStore, ScriptedSynthesizer, ScriptedWorkflowClient};
