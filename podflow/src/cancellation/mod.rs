//! Advisory cancellation and run-scoped cleanup.
//!
//! This module provides:
//! - [`CancellationToken`], checked by the orchestrator at stage boundaries
//! - [`CleanupRegistry`] for the run's temporary files
//! - [`CancellationMonitor`], which reacts to client disconnects

mod cleanup;
mod monitor;
mod token;

pub use cleanup::{CleanupFailure, CleanupRegistry};
pub use monitor::{CancellationMonitor, MonitorOutcome};
pub use token::{CancelReason, CancellationToken};
