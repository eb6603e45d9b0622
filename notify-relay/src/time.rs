//! Time sources.
//!
//! Every timing decision in the relay (cooldowns, retry backoff, batch windows and
//! in-memory key expiry) reads the clock through [`TimeSource`], so tests can drive
//! time deterministically with [`ManualTimeSource`].

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of the current wall-clock time.
pub trait TimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualTimeSource {
    time: Mutex<DateTime<Utc>>,
}

impl ManualTimeSource {
    pub fn new(initial: DateTime<Utc>) -> Self {
        Self {
            time: Mutex::new(initial),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut time = self.time.lock();
        *time += by;
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.lock() = time;
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_source_advance() {
        let start = Utc::now();
        let clock = ManualTimeSource::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_system_time_source_is_current() {
        let before = Utc::now();
        let now = SystemTimeSource.now();
        assert!(now >= before);
    }
}
