//! Time utility functions
//!
//! All pipeline timestamps are milliseconds since the Unix epoch, UTC.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Milliseconds in one hour
pub const HOUR_MS: i64 = 60 * 60 * 1000;

/// Milliseconds in one day
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Convert milliseconds since Unix epoch to DateTime<Utc>.
/// Returns `None` for values chrono cannot represent.
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Start of the bucket of `width_ms` containing `millis` (floor, also for negatives)
pub fn bucket_start(millis: i64, width_ms: i64) -> i64 {
    millis.div_euclid(width_ms) * width_ms
}

/// Start of the UTC hour containing `millis`
pub fn hour_start(millis: i64) -> i64 {
    bucket_start(millis, HOUR_MS)
}

/// Start of the UTC day containing `millis`
pub fn day_start(millis: i64) -> i64 {
    bucket_start(millis, DAY_MS)
}

/// Current wall-clock time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A duration in whole milliseconds, saturating at `i64::MAX`
pub fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Parse ISO 8601 / RFC 3339 timestamp string to milliseconds
pub fn parse_iso_millis(ts: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_millis_to_datetime_known_value() {
        // 2024-01-01 00:00:00 UTC
        let dt = millis_to_datetime(1_704_067_200_000).unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 1);
        assert_eq!(dt.hour(), 0);
    }

    #[test]
    fn test_millis_to_datetime_out_of_range() {
        assert!(millis_to_datetime(i64::MAX).is_none());
    }

    #[test]
    fn test_hour_and_day_start() {
        let ts = 1_704_067_200_000 + 5 * HOUR_MS + 1234;
        assert_eq!(hour_start(ts), 1_704_067_200_000 + 5 * HOUR_MS);
        assert_eq!(day_start(ts), 1_704_067_200_000);
    }

    #[test]
    fn test_bucket_start_negative() {
        assert_eq!(hour_start(-1), -HOUR_MS);
    }

    #[test]
    fn test_parse_iso_millis() {
        assert_eq!(
            parse_iso_millis("2024-01-01T01:00:00Z"),
            Some(1_704_067_200_000 + HOUR_MS)
        );
        assert_eq!(parse_iso_millis("yesterday"), None);
    }
}
