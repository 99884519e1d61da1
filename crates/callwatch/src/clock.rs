//! Time sources for the debouncer.
//!
//! Debounce decisions compare wall-clock timestamps. [`MonotonicClock`] derives
//! them from tokio's monotonic clock so timestamps never go backwards and
//! follow tokio's paused time in tests; [`ManualClock`] is set explicitly and
//! drives virtual-time replays.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// A source of "now" for debounce decisions.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock anchored, monotonically advancing clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    wall_origin: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    /// Anchor a new clock at the current wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            wall_origin: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        offset(self.wall_origin, self.origin.elapsed())
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock stopped at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a clock stopped at the Unix epoch.
    #[must_use]
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Move the clock to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.lock() = at;
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        *now = offset(*now, by);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned lock still holds a valid timestamp.
        self.now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// Add a std duration to a timestamp, saturating at the maximum timestamp.
#[must_use]
pub fn offset(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time elapsed from `earlier` to `later`, zero if `later` is not after it.
#[must_use]
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    later
        .signed_duration_since(earlier)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_set_and_advance() {
        let clock = ManualClock::at_epoch();
        assert_eq!(clock.now(), DateTime::<Utc>::UNIX_EPOCH);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now().timestamp_millis(), 1500);

        let at = DateTime::<Utc>::from_timestamp_millis(42_000).unwrap();
        clock.set(at);
        assert_eq!(clock.now(), at);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let a = ManualClock::at_epoch();
        let b = a.clone();
        a.advance(Duration::from_secs(3));
        assert_eq!(b.now().timestamp_millis(), 3000);
    }

    #[test]
    fn test_offset_saturates() {
        let far = offset(DateTime::<Utc>::UNIX_EPOCH, Duration::from_secs(u64::MAX));
        assert_eq!(far, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_elapsed_between_clamps_negative() {
        let t0 = DateTime::<Utc>::from_timestamp_millis(5000).unwrap();
        let t1 = DateTime::<Utc>::from_timestamp_millis(7500).unwrap();
        assert_eq!(elapsed_between(t0, t1), Duration::from_millis(2500));
        assert_eq!(elapsed_between(t1, t0), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_tokio_time() {
        let clock = MonotonicClock::new();
        let start = clock.now();

        tokio::time::advance(Duration::from_millis(2100)).await;
        assert_eq!(elapsed_between(start, clock.now()), Duration::from_millis(2100));
    }
}
