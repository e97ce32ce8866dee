//! Utility functions for identifiers, timestamps and run-directory naming.

pub mod timestamps;

pub use timestamps::{date_partition, elapsed_seconds, iso_timestamp, Timestamp};

use uuid::Uuid;

/// Generates a new time-ordered run identifier.
///
/// UUIDv7 keeps run directories sortable by creation time.
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::now_v7()
}
