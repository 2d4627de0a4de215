use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of the current time.
///
/// Every time-dependent decision of a queue (lease expiry, backoff windows,
/// rate limiting, retention) reads the time through this trait so tests can
/// drive it deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

pub mod mock {
    use super::*;
    use std::sync::{Mutex, PoisonError};

    /// Manually driven clock.
    #[derive(Debug)]
    pub struct MockClock {
        current_time: Mutex<DateTime<Utc>>,
    }

    impl MockClock {
        pub fn new(initial_time: DateTime<Utc>) -> Self {
            Self {
                current_time: Mutex::new(initial_time),
            }
        }

        pub fn set_time(&self, time: DateTime<Utc>) {
            *self
                .current_time
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = time;
        }

        pub fn advance(&self, duration: std::time::Duration) {
            let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
            let mut time = self
                .current_time
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *time = time.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .current_time
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockClock;
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn mock_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = MockClock::new(start);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), start + chrono::Duration::milliseconds(1500));

        clock.set_time(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn shared_clock_delegates() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(MockClock::new(start));
        assert_eq!(clock.now(), start);
    }
}
