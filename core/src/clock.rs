//! Clock abstraction for deterministic timing in tests.
//!
//! The engine stamps every write with an "instant" (100-nanosecond ticks
//! since a fixed epoch) and every access with a whole-second Unix timestamp. Both are read from a [`ClockSource`] rather than directly from
//! `SystemTime`, so sweeper and batching tests can run against a virtual
//! clock instead of sleeping in wall-clock time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of 100-nanosecond ticks in one second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Abstraction over "now", for dependency injection in tests.
///
/// Implementations must be monotonic enough for non-decreasing timestamps
/// within a process to hold.
pub trait ClockSource: Send + Sync {
    /// Current instant as 100-nanosecond ticks since the Unix epoch.
    fn ticks_now(&self) -> i64;

    /// Current instant as whole seconds since the Unix epoch.
    fn seconds_now(&self) -> i64 {
        self.ticks_now() / TICKS_PER_SECOND
    }
}

/// Default clock source, backed by the real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn ticks_now(&self) -> i64 {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch");
        since_epoch.as_secs() as i64 * TICKS_PER_SECOND
            + i64::from(since_epoch.subsec_nanos()) / 100
    }
}

/// A manually-advanced clock for deterministic tests.
///
/// Starts at an arbitrary fixed instant so tests don't depend on `SystemTime`
/// at all. `advance` is the only way time moves; it is safe to call from
/// multiple threads (backed by an `AtomicI64`).
#[derive(Debug)]
pub struct VirtualClock {
    ticks: AtomicI64,
}

impl VirtualClock {
    /// Creates a virtual clock starting at the given tick count.
    #[must_use]
    pub fn new(start_ticks: i64) -> Self {
        Self {
            ticks: AtomicI64::new(start_ticks),
        }
    }

    /// Advances the clock by the given duration, in whole seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.ticks
            .fetch_add(secs * TICKS_PER_SECOND, Ordering::SeqCst);
    }

    /// Advances the clock by a fractional number of seconds.
    pub fn advance_millis(&self, millis: i64) {
        self.ticks
            .fetch_add(millis * (TICKS_PER_SECOND / 1000), Ordering::SeqCst);
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        // Arbitrary fixed epoch far from zero so "negative infinity" sentinels
        // used by the batch sweeper are unambiguous.
        Self::new(1_700_000_000 * TICKS_PER_SECOND)
    }
}

impl ClockSource for VirtualClock {
    fn ticks_now(&self) -> i64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_advances_deterministically() {
        let clock = VirtualClock::new(0);
        assert_eq!(clock.ticks_now(), 0);
        clock.advance_secs(2);
        assert_eq!(clock.ticks_now(), 2 * TICKS_PER_SECOND);
        clock.advance_millis(500);
        assert_eq!(clock.seconds_now(), 2);
    }

    #[test]
    fn system_clock_produces_plausible_ticks() {
        let ticks = SystemClock.ticks_now();
        // Sometime after 2023-01-01 in ticks-since-epoch.
        assert!(ticks > 1_672_531_200 * TICKS_PER_SECOND);
    }
}
