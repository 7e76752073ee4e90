//! Logical time on the shared timeline
//!
//! All engine arithmetic is done in whole milliseconds since the Unix epoch.
//! Widgets speak fractional seconds relative to the start of their recording;
//! the helpers here are the only place the two units meet.

use chrono::{DateTime, Utc};

/// Absolute position on the shared timeline, in milliseconds since epoch
pub type Timestamp = i64;

/// Signed distance between two timestamps, in milliseconds
pub type Millis = i64;

pub const MILLIS_PER_SECOND: Millis = 1_000;

/// Convert a widget offset (seconds) to milliseconds, truncating like the widgets report
#[inline]
pub fn secs_to_millis(seconds: f64) -> Millis {
    (seconds * MILLIS_PER_SECOND as f64).floor() as Millis
}

/// Convert milliseconds to a widget offset (seconds)
#[inline]
pub fn millis_to_secs(millis: Millis) -> f64 {
    millis as f64 / MILLIS_PER_SECOND as f64
}

/// Parse an RFC 3339 timestamp as returned by the metadata APIs
pub fn parse_rfc3339(value: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

/// Format a timestamp for log lines
pub fn format_timestamp(ts: Timestamp) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ts) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => format!("{}ms", ts),
    }
}

/// Current wall clock time
pub fn now() -> Timestamp {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_conversion() {
        assert_eq!(secs_to_millis(1.5), 1_500);
        assert_eq!(secs_to_millis(0.001), 1);
        assert!((millis_to_secs(2_250) - 2.25).abs() < 1e-9);
    }

    #[test]
    fn test_negative_offsets_floor() {
        assert_eq!(secs_to_millis(-0.0005), -1);
    }

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(parse_rfc3339("1970-01-01T00:00:01Z"), Some(1_000));
        assert_eq!(parse_rfc3339("2017-07-14T02:40:00Z"), Some(1_500_000_000_000));
        assert_eq!(parse_rfc3339("yesterday"), None);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1_500_000_000_000), "2017-07-14 02:40:00.000");
    }
}
