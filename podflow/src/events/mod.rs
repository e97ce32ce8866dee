//! Progress notification delivery.
//!
//! This module provides the [`ProgressChannel`] the orchestrator writes to and
//! the [`NotificationSink`] implementations it delivers through.

mod channel;
mod sink;

pub use channel::ProgressChannel;
pub use sink::{CollectingSink, NotificationSink, SinkClosed, StreamSink};
