//! Manually advanced clock for deterministic expiry tests.

use std::sync::RwLock;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::clock::Clock;

/// A clock that only moves when told to.
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at the given instant.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Create a clock frozen at a unix timestamp.
    pub fn at_unix(secs: i64) -> Self {
        let now = Utc
            .timestamp_opt(secs, 0)
            .single()
            .expect("valid unix timestamp");
        Self::new(now)
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at_unix(1_700_000_000)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance() {
        let clock = ManualClock::at_unix(1_000);
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.unix_now(), 1_030);
    }
}
