//! Clock abstraction for determinism.
//!
//! Every expiry in the relay (records, pairings, the retention window) is
//! computed from an injected clock so the sweep and the claim loop can be
//! tested without sleeping.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Abstraction over system time for deterministic behavior.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the instant `ttl` from now, saturating at the maximum
    /// representable time.
    fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
        let now = self.now();
        TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Pinned(DateTime<Utc>);

    impl Clock for Pinned {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn test_deadline_adds_ttl() {
        let clock = Pinned(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());

        let deadline = clock.deadline(Duration::from_secs(30));

        assert_eq!(
            deadline,
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 30).unwrap()
        );
    }

    #[test]
    fn test_deadline_saturates_on_overflow() {
        let clock = Pinned(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());

        let deadline = clock.deadline(Duration::MAX);

        assert_eq!(deadline, DateTime::<Utc>::MAX_UTC);
    }
}
