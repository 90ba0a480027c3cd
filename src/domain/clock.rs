//! Injectable wall clock.
//!
//! Rate-limit bans and inactivity windows are measured against a
//! [`Clock`] so that time can be advanced deterministically in tests.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at the given instant.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = add_saturating(*now, by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Adds a std duration to a timestamp, clamping at the representable maximum.
#[must_use]
pub fn add_saturating(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Returns `true` once strictly more than `window` has passed since `since`.
#[must_use]
pub fn is_elapsed(since: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    add_saturating(since, window) < now
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now() - start, TimeDelta::seconds(30));
    }

    #[test]
    fn add_saturating_clamps() {
        let far = add_saturating(Utc::now(), Duration::from_secs(u64::MAX));
        assert_eq!(far, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn elapsed_is_strict() {
        let start = Utc::now();
        let window = Duration::from_secs(10);
        assert!(!is_elapsed(start, window, add_saturating(start, window)));
        assert!(is_elapsed(
            start,
            window,
            add_saturating(start, Duration::from_secs(11))
        ));
    }
}
