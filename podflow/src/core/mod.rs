//! Core domain model types for podflow.
//!
//! This module contains the fundamental types used throughout the pipeline:
//! - The stage state machine
//! - Upstream framed events and their typed interpretation
//! - Client-facing progress notifications
//! - Artifact batch items and per-item errors

mod artifact;
mod event;
mod notification;
mod stage;

pub use artifact::{ArtifactBatchItem, ItemError, ItemOutcome, ItemPhase};
pub use event::{FramedEvent, UsageMetrics, WorkflowEvent, WorkflowOutcome};
pub use notification::{NotificationCategory, ProgressNotification};
pub use stage::Stage;
