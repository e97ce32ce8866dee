//! Client disconnect observation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::cleanup::CleanupRegistry;
use super::token::{CancelReason, CancellationToken};

/// How a monitored run ended from the monitor's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The channel closed with a terminal notification first.
    Completed,
    /// The client went away before the terminal notification.
    Disconnected {
        /// Number of temporary files that could not be removed.
        cleanup_failures: usize,
    },
}

/// Watches one run's client connection.
///
/// On disconnect before the terminal notification the monitor logs a warning,
/// cancels the run's token and removes its temporary files. It never touches
/// run state and never interrupts calls already in flight.
#[derive(Debug)]
pub struct CancellationMonitor {
    handle: JoinHandle<MonitorOutcome>,
}

impl CancellationMonitor {
    /// Spawns the monitor.
    ///
    /// `disconnected` resolves when the client stops observing the response;
    /// `channel_closed` is the progress channel's close signal.
    pub fn spawn<F>(
        run_id: Uuid,
        disconnected: F,
        channel_closed: watch::Receiver<bool>,
        token: Arc<CancellationToken>,
        cleanup: Arc<CleanupRegistry>,
        cleanup_timeout: Duration,
    ) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut channel_closed = channel_closed;
            tokio::select! {
                biased;
                () = wait_closed(&mut channel_closed) => {
                    debug!(run_id = %run_id, "Progress channel closed, monitor exiting");
                    MonitorOutcome::Completed
                }
                () = disconnected => {
                    if *channel_closed.borrow() {
                        return MonitorOutcome::Completed;
                    }
                    warn!(run_id = %run_id, "Client disconnected before completion, cancelling run");
                    token.cancel(CancelReason::ClientDisconnected);
                    let failures = cleanup.run_all(cleanup_timeout).await;
                    MonitorOutcome::Disconnected {
                        cleanup_failures: failures.len(),
                    }
                }
            }
        });
        Self { handle }
    }

    /// Waits for the monitor to finish.
    pub async fn join(self) -> MonitorOutcome {
        self.handle.await.unwrap_or(MonitorOutcome::Completed)
    }

    /// Stops the monitor without waiting.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    // A dropped sender means the run is gone; treat it like a close.
    let _closed = rx.wait_for(|closed| *closed).await.is_ok();
}
