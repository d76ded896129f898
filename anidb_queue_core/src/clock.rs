//! Wall-clock abstraction
//!
//! Every time-based rule (keep-alive spacing, forced logout, ban expiry,
//! due dates) reads the time through [`Clock`] so tests can drive it.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned lock still holds a valid timestamp.
        self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// Wall time anchored once and advanced by tokio's monotonic clock
///
/// Unaffected by wall-clock jumps, and follows tokio's paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            started: tokio::time::Instant::now(),
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
        self.anchor + chrono_duration(self.started.elapsed())
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Convert a std duration to a chrono one, saturating on overflow
pub fn chrono_duration(d: std::time::Duration) -> Duration {
    Duration::from_std(d).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advance_and_set() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::seconds(45));
        assert_eq!(clock.now(), start + Duration::seconds(45));

        let clone = clock.clone();
        clone.advance(Duration::milliseconds(100));
        assert_eq!(clock.now(), start + Duration::milliseconds(45_100));

        clock.set(start);
        assert_eq!(clone.now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_tokio_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = MonotonicClock::starting_at(start);
        tokio::time::advance(std::time::Duration::from_secs(45)).await;
        assert_eq!(clock.now(), start + Duration::seconds(45));
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
    }
}
