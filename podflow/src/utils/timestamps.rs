//! Timestamp helpers.

use chrono::{DateTime, Datelike, Utc};
use std::path::PathBuf;
use std::time::Instant;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// Format: `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`
///
/// # Examples
///
/// ```
/// use podflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the `YYYY/MM/DD` partition used for run directories and storage paths.
#[must_use]
pub fn date_partition(at: Timestamp) -> PathBuf {
    PathBuf::from(format!("{:04}", at.year()))
        .join(format!("{:02}", at.month()))
        .join(format!("{:02}", at.day()))
}

/// Seconds elapsed since `start`, rounded to two decimals.
#[must_use]
pub fn elapsed_seconds(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.ends_with("+00:00"));
    }

    #[test]
    fn test_date_partition_is_zero_padded() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(date_partition(at), PathBuf::from("2025").join("03").join("07"));
    }

    #[test]
    fn test_elapsed_seconds_is_non_negative() {
        assert!(elapsed_seconds(Instant::now()) >= 0.0);
    }
}
