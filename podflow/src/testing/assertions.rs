//! Test assertions for delivered notifications.

use crate::core::{NotificationCategory, ProgressNotification};
use crate::events::CollectingSink;

/// Asserts that progress percentages never decrease.
pub fn assert_percents_non_decreasing(sink: &CollectingSink) {
    let percents = sink.percents();
    assert!(
        percents.windows(2).all(|w| w[0] <= w[1]),
        "Expected non-decreasing percents, got {percents:?}"
    );
}

/// Asserts that sequence numbers run 1..=n without gaps.
pub fn assert_sequence_contiguous(sink: &CollectingSink) {
    let sequences: Vec<u64> = sink.notifications().iter().map(|n| n.sequence).collect();
    let expected: Vec<u64> = (1..=sequences.len() as u64).collect();
    assert_eq!(sequences, expected, "Expected contiguous sequence numbers");
}

/// Asserts exactly one terminal notification, delivered last, and returns it.
pub fn assert_single_terminal(sink: &CollectingSink) -> ProgressNotification {
    let notifications = sink.notifications();
    let terminals = sink.terminals();
    assert_eq!(
        terminals.len(),
        1,
        "Expected exactly one terminal notification, got {:?}",
        terminals.iter().map(|n| &n.status).collect::<Vec<_>>()
    );
    let last = notifications.last().cloned();
    assert_eq!(last.as_ref(), terminals.first(), "Terminal notification was not last");
    terminals[0].clone()
}

/// Asserts that the run ended with a success notification and returns it.
pub fn assert_succeeded(sink: &CollectingSink) -> ProgressNotification {
    let terminal = assert_single_terminal(sink);
    assert_eq!(
        terminal.category,
        NotificationCategory::Success,
        "Expected success, got error: {}",
        terminal.message
    );
    terminal
}

/// Asserts that the run ended with an error notification and returns it.
pub fn assert_failed(sink: &CollectingSink) -> ProgressNotification {
    let terminal = assert_single_terminal(sink);
    assert_eq!(
        terminal.category,
        NotificationCategory::Error,
        "Expected error, got {}: {}",
        terminal.category,
        terminal.message
    );
    terminal
}

/// Asserts that a notification with `status` was delivered.
pub fn assert_has_status(sink: &CollectingSink, status: &str) {
    assert!(
        !sink.with_status(status).is_empty(),
        "Expected a '{}' notification. Statuses: {:?}",
        status,
        sink.notifications().iter().map(|n| n.status.clone()).collect::<Vec<_>>()
    );
}
