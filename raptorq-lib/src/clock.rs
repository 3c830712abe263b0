//! Injected time source.
//!
//! Every expiry decision in the engine reads the current time through a
//! [`Clock`] so tests can move time forward without sleeping.

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as unix seconds.
    fn unix_now(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_tracks_utc() {
        let before = Utc::now().timestamp();
        let now = SystemClock.unix_now();
        assert!(now >= before);
        assert!(now - before < 5);
    }
}
