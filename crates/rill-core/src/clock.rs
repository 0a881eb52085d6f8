//! Time abstraction
//!
//! Backends that keep their own log (the in-memory one) need wall-clock
//! milliseconds for id assignment and a monotonic clock for idle times.
//! Tests drive both through [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Time source for testability
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Current UTC datetime
    fn now_utc(&self) -> DateTime<Utc>;

    /// Milliseconds since the Unix epoch, clamped at zero
    fn now_millis(&self) -> u64 {
        u64::try_from(self.now_utc().timestamp_millis()).unwrap_or(0)
    }
}

/// Real clock backed by system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base_instant: Instant,
    base_utc: DateTime<Utc>,
    offset_ms: AtomicU64,
}

impl ManualClock {
    /// Start a manual clock at the current time
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Start a manual clock at a fixed wall-clock time
    pub fn starting_at(utc: DateTime<Utc>) -> Self {
        Self {
            base_instant: Instant::now(),
            base_utc: utc,
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }

    fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base_instant + self.offset()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(self.offset()).unwrap_or(chrono::Duration::zero());
        self.base_utc + offset
    }
}
