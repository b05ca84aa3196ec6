//! Clock abstraction (injectable for testing).

use chrono::{DateTime, Utc};

/// Provides the current wall-clock time in UTC.
///
/// Injecting this through the scheduler rather than calling `Utc::now()`
/// directly makes timing-sensitive code deterministic in tests: schedule
/// decisions, state timestamps, and reference times all flow through one
/// replaceable source.
pub trait Clock: Send + Sync {
    /// Returns the current time as a UTC instant.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// The default [`Clock`] implementation backed by the system clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
