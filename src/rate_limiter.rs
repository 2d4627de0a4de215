use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::config::RateLimit;
use crate::errors::{QueueError, Result};
use crate::utils::{add_duration, remaining, sub_duration};

/// Sliding window log of admitted enqueues.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    limit: RateLimit,
    log: VecDeque<DateTime<Utc>>,
}

impl RateLimiter {
    pub(crate) fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            log: VecDeque::new(),
        }
    }

    /// Fails when admitting one more request at `now` would exceed the limit.
    ///
    /// The retry delay is the time until the oldest logged request leaves the window.
    pub(crate) fn check(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.evict(now);
        if self.log.len() < self.limit.max_requests as usize {
            return Ok(());
        }

        let retry_after = self
            .log
            .front()
            .map_or(self.limit.window, |oldest| {
                remaining(now, add_duration(*oldest, self.limit.window))
            });
        Err(QueueError::rate_limited(
            format!(
                "Rate limit exceeded ({} jobs per {}s)",
                self.limit.max_requests,
                self.limit.window.as_secs()
            ),
            retry_after,
        ))
    }

    pub(crate) fn record(&mut self, now: DateTime<Utc>) {
        self.log.push_back(now);
    }

    pub(crate) fn reset(&mut self) {
        self.log.clear();
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let window_start = sub_duration(now, self.limit.window);
        while self.log.front().is_some_and(|at| *at <= window_start) {
            self.log.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn limits_within_window() {
        let mut limiter = RateLimiter::new(RateLimit::per_minute(2));

        limiter.check(at(0)).unwrap();
        limiter.record(at(0));
        limiter.check(at(10)).unwrap();
        limiter.record(at(10));

        let err = limiter.check(at(20)).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(40)));

        limiter.check(at(60)).unwrap();
        limiter.record(at(60));
        let err = limiter.check(at(61)).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(9)));
    }

    #[test]
    fn checks_do_not_consume_budget() {
        let mut limiter = RateLimiter::new(RateLimit::per_minute(1));
        for _ in 0..5 {
            limiter.check(at(0)).unwrap();
        }
        limiter.record(at(0));
        assert!(limiter.check(at(0)).is_err());

        limiter.reset();
        assert!(limiter.check(at(0)).is_ok());
    }

    #[test]
    fn zero_budget_waits_whole_window() {
        let mut limiter = RateLimiter::new(RateLimit::new(0, Duration::from_secs(5)));
        let err = limiter.check(at(0)).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    }
}
