//! Wall-clock source for canary deadlines
//!
//! The generation selector is a pure function of `now`; the reconcile loop
//! reads `now` once per pass from the injected `Clock` and threads it through.
//! Tests use `MockClock` to step across canary deadlines deterministically.

use chrono::{DateTime, Utc};

/// Source of the current time, injected via `Context`
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by `chrono::Utc::now()`
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests
#[cfg(test)]
#[allow(clippy::expect_used)]
pub struct MockClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    #[allow(dead_code)]
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("MockClock lock poisoned") = now;
    }

    /// Move time forward, e.g. past a canary deadline
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("MockClock lock poisoned");
        *now += by;
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("MockClock lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now().timestamp() > 1_577_836_800);
    }

    #[test]
    fn test_mock_clock_steps_past_deadline() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let deadline = start + chrono::Duration::minutes(5);
        let clock = MockClock::new(start);
        assert!(clock.now() < deadline);

        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), deadline);
    }
}
