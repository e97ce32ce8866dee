//! The per-run progress channel.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use super::sink::NotificationSink;
use crate::core::{NotificationCategory, ProgressNotification};

#[derive(Debug, Default)]
struct ChannelState {
    sequence: u64,
    last_percent: u8,
    closed: bool,
    failed_writes: u64,
}

/// An ordered, push-based notification channel bound to one client.
///
/// The channel assigns sequence numbers, keeps progress percentages
/// non-decreasing, and closes after the first terminal notification. Writes
/// never block and write failures are ignored: the run continues whether or
/// not anyone is listening.
pub struct ProgressChannel {
    sink: Arc<dyn NotificationSink>,
    state: Mutex<ChannelState>,
    closed_tx: watch::Sender<bool>,
}

impl ProgressChannel {
    /// Creates a channel delivering into `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            sink,
            state: Mutex::new(ChannelState::default()),
            closed_tx,
        }
    }

    /// Sends a notification.
    ///
    /// Returns false when the channel was already closed by a terminal
    /// notification; the notification is discarded in that case.
    pub fn send(&self, mut notification: ProgressNotification) -> bool {
        let terminal = notification.is_terminal();
        {
            let mut state = self.state.lock();
            if state.closed {
                debug!(status = %notification.status, "Discarding notification after terminal");
                return false;
            }

            state.sequence += 1;
            notification.sequence = state.sequence;
            match notification.category {
                NotificationCategory::Progress => {
                    let percent = notification.percent.unwrap_or(state.last_percent).max(state.last_percent);
                    notification.percent = Some(percent);
                    state.last_percent = percent;
                }
                NotificationCategory::Success => state.last_percent = 100,
                NotificationCategory::Error => {}
            }
            if terminal {
                state.closed = true;
            }

            if let Err(e) = self.sink.try_deliver(&notification) {
                state.failed_writes += 1;
                debug!(sequence = notification.sequence, error = %e, "Notification write failed");
            }
        }

        if terminal {
            self.sink.close();
            self.closed_tx.send_replace(true);
        }
        true
    }

    /// Sends a progress notification.
    pub fn progress(&self, status: &str, message: impl Into<String>, percent: u8) -> bool {
        self.send(ProgressNotification::progress(status, message, percent))
    }

    /// Returns true once a terminal notification has been sent.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the highest progress percentage sent so far.
    #[must_use]
    pub fn last_percent(&self) -> u8 {
        self.state.lock().last_percent
    }

    /// Returns the number of notifications sent.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.state.lock().sequence
    }

    /// Returns the number of writes the sink rejected.
    #[must_use]
    pub fn failed_writes(&self) -> u64 {
        self.state.lock().failed_writes
    }

    /// Returns a receiver that flips to `true` when the channel closes.
    #[must_use]
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }
}

impl std::fmt::Debug for ProgressChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ProgressChannel")
            .field("sequence", &state.sequence)
            .field("last_percent", &state.last_percent)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingSink, SinkClosed};
    use pretty_assertions::assert_eq;

    fn collecting() -> (Arc<CollectingSink>, ProgressChannel) {
        let sink = Arc::new(CollectingSink::new());
        let channel = ProgressChannel::new(sink.clone());
        (sink, channel)
    }

    #[test]
    fn test_sequence_numbers_follow_send_order() {
        let (sink, channel) = collecting();
        channel.progress("a", "one", 5);
        channel.progress("b", "two", 10);

        let seqs: Vec<_> = sink.notifications().iter().map(|n| n.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_progress_never_regresses() {
        let (sink, channel) = collecting();
        channel.progress("a", "one", 40);
        channel.progress("b", "two", 35);
        channel.progress("c", "three", 60);

        assert_eq!(sink.percents(), vec![40, 40, 60]);
        assert_eq!(channel.last_percent(), 60);
    }

    #[test]
    fn test_exactly_one_terminal() {
        let (sink, channel) = collecting();
        assert!(channel.send(ProgressNotification::error("quota exceeded")));
        assert!(!channel.send(ProgressNotification::success("late")));
        assert!(!channel.progress("x", "late progress", 99));

        assert_eq!(sink.terminals().len(), 1);
        assert_eq!(sink.len(), 1);
        assert!(sink.is_closed());
        assert!(channel.is_closed());
    }

    #[test]
    fn test_closed_signal_flips_on_terminal() {
        let (_sink, channel) = collecting();
        let rx = channel.closed_signal();
        assert!(!*rx.borrow());

        channel.send(ProgressNotification::success("done"));
        assert!(*rx.borrow());
    }

    struct RejectingSink;

    impl NotificationSink for RejectingSink {
        fn try_deliver(&self, _n: &ProgressNotification) -> Result<(), SinkClosed> {
            Err(SinkClosed)
        }
    }

    #[test]
    fn test_write_failures_are_tolerated() {
        let channel = ProgressChannel::new(Arc::new(RejectingSink));
        assert!(channel.progress("a", "one", 10));
        assert!(channel.send(ProgressNotification::success("done")));

        assert_eq!(channel.failed_writes(), 2);
        assert_eq!(channel.sent(), 2);
        assert!(channel.is_closed());
    }
}
