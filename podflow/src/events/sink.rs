//! Notification sink trait and implementations.

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::ProgressNotification;

/// Error returned when the consumer behind a sink has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("notification sink is closed")]
pub struct SinkClosed;

/// Trait for sinks that deliver progress notifications to a consumer.
///
/// Delivery never blocks. A sink whose consumer has disconnected reports
/// [`SinkClosed`]; callers treat that as informational only.
pub trait NotificationSink: Send + Sync {
    /// Delivers one notification without blocking.
    fn try_deliver(&self, notification: &ProgressNotification) -> Result<(), SinkClosed>;

    /// Signals that no further notifications will be delivered.
    fn close(&self) {}
}

/// A sink that writes encoded frames into an unbounded channel.
///
/// The receiving half is the client's response body. Closing the sink drops
/// the sender so the response terminates once the frames are drained.
#[derive(Debug)]
pub struct StreamSink {
    sender: parking_lot::Mutex<Option<UnboundedSender<String>>>,
}

impl StreamSink {
    /// Creates a sink writing into `sender`.
    #[must_use]
    pub fn new(sender: UnboundedSender<String>) -> Self {
        Self {
            sender: parking_lot::Mutex::new(Some(sender)),
        }
    }
}

impl NotificationSink for StreamSink {
    fn try_deliver(&self, notification: &ProgressNotification) -> Result<(), SinkClosed> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(SinkClosed)?;
        sender.send(notification.to_frame()).map_err(|_| SinkClosed)
    }

    fn close(&self) {
        self.sender.lock().take();
    }
}

/// A collecting sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingSink {
    notifications: parking_lot::RwLock<Vec<ProgressNotification>>,
    closed: std::sync::atomic::AtomicBool,
}

impl CollectingSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected notifications in delivery order.
    #[must_use]
    pub fn notifications(&self) -> Vec<ProgressNotification> {
        self.notifications.read().clone()
    }

    /// Returns the number of collected notifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notifications.read().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifications.read().is_empty()
    }

    /// Returns collected notifications with the given status.
    #[must_use]
    pub fn with_status(&self, status: &str) -> Vec<ProgressNotification> {
        self.notifications
            .read()
            .iter()
            .filter(|n| n.status == status)
            .cloned()
            .collect()
    }

    /// Returns the percent values of all progress notifications.
    #[must_use]
    pub fn percents(&self) -> Vec<u8> {
        self.notifications
            .read()
            .iter()
            .filter_map(|n| n.percent)
            .collect()
    }

    /// Returns all terminal notifications.
    #[must_use]
    pub fn terminals(&self) -> Vec<ProgressNotification> {
        self.notifications
            .read()
            .iter()
            .filter(|n| n.is_terminal())
            .cloned()
            .collect()
    }

    /// Returns true once the sink has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl NotificationSink for CollectingSink {
    fn try_deliver(&self, notification: &ProgressNotification) -> Result<(), SinkClosed> {
        self.notifications.write().push(notification.clone());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_sink_writes_frames() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = StreamSink::new(tx);

        sink.try_deliver(&ProgressNotification::progress("started", "go", 5)).unwrap();
        let frame = rx.try_recv().unwrap();
        assert!(frame.starts_with("event: progress\n"));
    }

    #[test]
    fn test_stream_sink_reports_disconnected_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = StreamSink::new(tx);
        drop(rx);

        let result = sink.try_deliver(&ProgressNotification::progress("x", "y", 1));
        assert_eq!(result, Err(SinkClosed));
    }

    #[test]
    fn test_stream_sink_close_ends_the_stream() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = StreamSink::new(tx);
        sink.try_deliver(&ProgressNotification::success("done")).unwrap();
        sink.close();

        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(sink.try_deliver(&ProgressNotification::success("again")), Err(SinkClosed));
    }

    #[test]
    fn test_collecting_sink_filters() {
        let sink = CollectingSink::new();
        assert!(sink.is_empty());

        sink.try_deliver(&ProgressNotification::progress("a", "one", 10)).unwrap();
        sink.try_deliver(&ProgressNotification::progress("b", "two", 20)).unwrap();
        sink.try_deliver(&ProgressNotification::error("bad")).unwrap();

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.with_status("b").len(), 1);
        assert_eq!(sink.percents(), vec![10, 20]);
        assert_eq!(sink.terminals().len(), 1);
    }
}
