//! Clock abstraction for time-sensitive security state
//!
//! Every expiry decision in the services (session idle timeouts, lockout
//! windows, anti-forgery token lifetimes, token expiry) reads the current time
//! through a [`Clock`] so that tests can move time forward without sleeping.

use chrono::{DateTime, Duration, Utc};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current wall-clock time
pub trait Clock: Send + Sync + Debug {
    /// Current time in UTC
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock
///
/// Clones share the same instant, so a test can hand one clone to the stores
/// and keep another to advance time. The instant is kept with nanosecond
/// precision, so `ManualClock::new(t).now() == t` for any `t` before 2262.
#[derive(Debug, Clone)]
pub struct ManualClock {
    nanos: Arc<AtomicI64>,
}

fn to_nanos(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

impl ManualClock {
    /// Create a clock frozen at the given instant
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            nanos: Arc::new(AtomicI64::new(to_nanos(start))),
        }
    }

    /// Create a clock frozen at the current system time
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward (or backward, for a negative duration)
    pub fn advance(&self, by: Duration) {
        let by = by.num_nanoseconds().unwrap_or(i64::MAX);
        self.nanos.fetch_add(by, Ordering::SeqCst);
    }

    /// Jump to an absolute instant
    pub fn set(&self, to: DateTime<Utc>) {
        self.nanos.store(to_nanos(to), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Shared handle to a clock
pub type SharedClock = Arc<dyn Clock>;
