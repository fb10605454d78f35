//! Time sources for drain arithmetic.

use chrono::Utc;
use parking_lot::Mutex;

/// Unix time in seconds. Fractional so that fractional drain rates
/// (e.g. 10 drips per 37 seconds) accrue without rounding bias.
pub type Timestamp = f64;

/// A source of current time.
///
/// Injected into the limiter so tests can simulate elapsed time without
/// sleeping.
pub trait Clock: Send + Sync {
    /// Current unix time in seconds.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at the given unix time.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `seconds`.
    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }

    /// Set the clock to an absolute unix time.
    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
