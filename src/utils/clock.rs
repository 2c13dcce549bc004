//! Clock abstractions for deterministic testing of time-sensitive logic.
//!
//! Cooldowns (key rotation), backoff schedules (recovery), and cache TTLs all
//! need to reason about elapsed time without making tests flaky. `MockClock`
//! stands in for `std::time::Instant`/`SystemTime` in unit tests; production
//! code uses `std::time` directly.

use std::time::Duration;

/// A clock whose current time advances only when told to.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockClock {
    now_secs: u64,
}

impl MockClock {
    /// Create a clock starting at `now_secs` (unix seconds).
    pub fn new(now_secs: u64) -> Self {
        Self { now_secs }
    }

    /// Current time in seconds.
    pub fn now(&self) -> u64 {
        self.now_secs
    }

    /// Advance the clock by `secs` seconds.
    pub fn advance_secs(&mut self, secs: u64) {
        self.now_secs = self.now_secs.saturating_add(secs);
    }

    /// Whether `dur` has elapsed since `start` given the clock's current time.
    pub fn has_elapsed(&self, start: u64, dur: Duration) -> bool {
        self.now_secs.saturating_sub(start) >= dur.as_secs()
    }
}

/// Human-readable timestamp rendering, independent of any clock instance.
pub mod time_utils {
    use chrono::{DateTime, Utc};

    /// Format a unix-seconds timestamp as an RFC 3339 string.
    pub fn format_timestamp(unix_secs: u64) -> String {
        DateTime::<Utc>::from_timestamp(unix_secs as i64, 0)
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is valid"))
            .to_rfc3339()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_and_reports_elapsed() {
        let mut clock = MockClock::new(100);
        assert_eq!(clock.now(), 100);
        assert!(!clock.has_elapsed(100, Duration::from_secs(10)));
        clock.advance_secs(10);
        assert!(clock.has_elapsed(100, Duration::from_secs(10)));
    }

    #[test]
    fn formats_epoch() {
        assert!(time_utils::format_timestamp(0).contains("1970"));
    }
}
