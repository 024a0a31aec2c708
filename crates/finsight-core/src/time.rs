// SPDX-FileCopyrightText: 2026 Finsight Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timestamp formatting shared by every persisted record.
//!
//! All timestamps are fixed-width UTC strings with millisecond precision, so
//! string comparison in SQL orders them chronologically.

use chrono::{DateTime, Utc};

/// Format string for persisted timestamps, e.g. `2026-01-01T00:00:00.000Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Formats a UTC instant in the persisted timestamp format.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// The current instant in the persisted timestamp format.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Unix seconds of 9999-12-31T23:59:59Z, the last instant with a four-digit year.
const LAST_FIXED_WIDTH_SECS: i64 = 253_402_300_799;

/// The latest instant that still formats at fixed width.
pub fn far_future() -> DateTime<Utc> {
    DateTime::from_timestamp(LAST_FIXED_WIDTH_SECS, 999_000_000).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at + duration`, saturating at [`far_future`].
pub fn add_duration(at: DateTime<Utc>, duration: std::time::Duration) -> DateTime<Utc> {
    let limit = far_future();
    chrono::TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .filter(|deadline| *deadline <= limit)
        .unwrap_or(limit)
}

/// Parses a persisted timestamp back into a UTC instant.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_is_fixed_width_millis() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_timestamp(at), "2026-01-02T03:04:05.000Z");
    }

    #[test]
    fn lexicographic_order_matches_chronological() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let later = earlier + chrono::Duration::milliseconds(1500);
        assert!(format_timestamp(earlier) < format_timestamp(later));
    }

    #[test]
    fn add_duration_saturates() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            add_duration(at, std::time::Duration::from_millis(1500)),
            at + chrono::Duration::milliseconds(1500)
        );
        let saturated = add_duration(at, std::time::Duration::MAX);
        assert_eq!(format_timestamp(saturated), "9999-12-31T23:59:59.999Z");
    }

    #[test]
    fn parse_round_trips_formatted_value() {
        let at = Utc.with_ymd_and_hms(2026, 6, 30, 23, 59, 59).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(at)), Some(at));
        assert_eq!(parse_timestamp("not a time"), None);
    }
}
