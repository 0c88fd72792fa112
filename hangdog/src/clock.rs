//! Timestamp source
//!
//! Wall-clock milliseconds anchored once and advanced with the monotonic
//! clock, so a user changing the system time does not make task durations
//! negative or move hang reports around.

use chrono::{DateTime, Local, Utc};
use std::fmt::Write as _;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::domain::Timestamp;

/// Pattern used in log blocks and the CLI output
pub const LOG_TIME_PATTERN: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Monotonic-corrected wall clock
///
/// Cheap to copy; every component that stamps records holds its own copy of
/// the one created by the controller so all timestamps share an anchor.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_wall_ms: u64,
    anchor: Instant,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        let anchor_wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        Self { anchor_wall_ms, anchor: Instant::now() }
    }

    /// Current time as wall-clock milliseconds
    #[must_use]
    pub fn now(&self) -> Timestamp {
        let elapsed = u64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(u64::MAX);
        Timestamp(self.anchor_wall_ms.saturating_add(elapsed))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a timestamp in local time.
///
/// Returns an empty string when the timestamp is out of range or the pattern
/// is invalid.
#[must_use]
pub fn format_timestamp(ts: Timestamp, pattern: &str) -> String {
    let Ok(millis) = i64::try_from(ts.as_millis()) else {
        return String::new();
    };
    let Some(utc) = DateTime::<Utc>::from_timestamp_millis(millis) else {
        return String::new();
    };
    let local = utc.with_timezone(&Local);

    let mut out = String::new();
    if write!(out, "{}", local.format(pattern)).is_err() {
        return String::new();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = Clock::new();
        let first = clock.now();
        std::thread::sleep(Duration::from_millis(20));
        let second = clock.now();
        assert!(second >= first);
        assert!(second.saturating_duration_since(first) >= Duration::from_millis(20));
    }

    #[test]
    fn test_copies_share_anchor() {
        let clock = Clock::new();
        let copy = clock;
        let a = clock.now();
        let b = copy.now();
        assert!(b.as_millis().abs_diff(a.as_millis()) < 5);
    }

    #[test]
    fn test_format_timestamp_shape() {
        let formatted = format_timestamp(Timestamp(1_700_000_000_123), LOG_TIME_PATTERN);
        // "yyyy-mm-dd hh:mm:ss.SSS" in whatever the local zone is
        assert_eq!(formatted.len(), 23);
        assert!(formatted.ends_with(".123"));
    }

    #[test]
    fn test_format_timestamp_failure_is_empty() {
        assert_eq!(format_timestamp(Timestamp(u64::MAX), LOG_TIME_PATTERN), "");
        assert_eq!(format_timestamp(Timestamp(0), "%Q"), "");
    }
}
