use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lease_queue_job::{JobId, RetryPolicy};

use crate::errors::{QueueError, Result};
use crate::utils::{add_duration, remaining};

/// Delay armed after the `attempt`-th failure of a key.
///
/// - fixed: `initial_delay`
/// - linear: `min(initial_delay * attempt, max_delay)`
/// - exponential: `min(initial_delay * 2^(attempt - 1), max_delay)`
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    policy.delay_for_attempt(attempt)
}

#[derive(Debug, Clone)]
struct KeyHistory {
    latest_job: JobId,
    failures: u32,
    policy: Option<RetryPolicy>,
    next_allowed_at: Option<DateTime<Utc>>,
}

impl KeyHistory {
    fn window_active(&self, now: DateTime<Utc>) -> bool {
        self.next_allowed_at.is_some_and(|at| now < at)
    }
}

/// Per idempotency key bookkeeping: which job currently owns the key, how many
/// times the key failed and until when resubmissions are refused.
#[derive(Debug, Default)]
pub(crate) struct BackoffController {
    keys: HashMap<String, KeyHistory>,
}

impl BackoffController {
    pub(crate) fn latest_job(&self, key: &str) -> Option<&JobId> {
        self.keys.get(key).map(|history| &history.latest_job)
    }

    /// Refuses a resubmission while the key's backoff window is open.
    pub(crate) fn check_window(&self, key: &str, now: DateTime<Utc>) -> Result<()> {
        let Some(next_allowed_at) = self.keys.get(key).and_then(|h| h.next_allowed_at) else {
            return Ok(());
        };
        if now < next_allowed_at {
            return Err(QueueError::rate_limited(
                format!("Job '{key}' is in backoff period after failure"),
                remaining(now, next_allowed_at),
            ));
        }
        Ok(())
    }

    /// Attempt number the next job created under `key` receives.
    pub(crate) fn next_attempt(&self, key: &str) -> u32 {
        self.keys
            .get(key)
            .map_or(1, |history| history.failures.saturating_add(1))
    }

    pub(crate) fn remembered_policy(&self, key: &str) -> Option<RetryPolicy> {
        self.keys.get(key).and_then(|history| history.policy)
    }

    /// Makes `job_id` the owner of `key`.
    pub(crate) fn bind(&mut self, key: &str, job_id: JobId, policy: Option<RetryPolicy>) {
        match self.keys.get_mut(key) {
            Some(history) => {
                history.latest_job = job_id;
                history.policy = policy.or(history.policy);
                history.next_allowed_at = None;
            }
            None => {
                self.keys.insert(
                    key.to_string(),
                    KeyHistory {
                        latest_job: job_id,
                        failures: 0,
                        policy,
                        next_allowed_at: None,
                    },
                );
            }
        }
    }

    /// Records a failure of the key's current job.
    ///
    /// Returns the armed delay, or `None` when the key has no retry policy or
    /// ran out of attempts. The failure count keeps growing either way; only a
    /// success or retention clears it.
    pub(crate) fn record_failure(&mut self, key: &str, now: DateTime<Utc>) -> Option<Duration> {
        let history = self.keys.get_mut(key)?;
        history.failures = history.failures.saturating_add(1);
        let failures = history.failures;

        let delay = history
            .policy
            .filter(|policy| policy.allows_retry_after(failures))
            .map(|policy| calculate_backoff(failures, &policy));
        history.next_allowed_at = delay.map(|delay| add_duration(now, delay));
        delay
    }

    pub(crate) fn record_success(&mut self, key: &str) {
        self.keys.remove(key);
    }

    /// Drops the history of `key` once its job is gone and no window is open.
    pub(crate) fn forget_if_idle(&mut self, key: &str, job_id: &JobId, now: DateTime<Utc>) {
        let idle = self
            .keys
            .get(key)
            .is_some_and(|h| &h.latest_job == job_id && !h.window_active(now));
        if idle {
            self.keys.remove(key);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn exponential() -> RetryPolicy {
        RetryPolicy::exponential(3, Duration::from_millis(100), Duration::from_secs(1))
    }

    #[test]
    fn failure_arms_growing_windows() {
        let mut backoff = BackoffController::default();
        backoff.bind("k", JobId::from("job-1"), Some(exponential()));

        assert_eq!(
            backoff.record_failure("k", at_millis(0)),
            Some(Duration::from_millis(100))
        );
        assert_eq!(backoff.next_attempt("k"), 2);

        let err = backoff.check_window("k", at_millis(40)).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_millis(60)));
        assert!(backoff.check_window("k", at_millis(100)).is_ok());

        backoff.bind("k", JobId::from("job-2"), None);
        assert_eq!(backoff.remembered_policy("k"), Some(exponential()));
        assert_eq!(
            backoff.record_failure("k", at_millis(200)),
            Some(Duration::from_millis(200))
        );
        assert_eq!(backoff.next_attempt("k"), 3);
    }

    #[test]
    fn exhausted_key_keeps_counting_without_windows() {
        let mut backoff = BackoffController::default();
        let policy = RetryPolicy::fixed(2, Duration::from_secs(1));
        backoff.bind("k", JobId::from("job-1"), Some(policy));
        assert_eq!(
            backoff.record_failure("k", at_millis(0)),
            Some(Duration::from_secs(1))
        );

        backoff.bind("k", JobId::from("job-2"), None);
        assert_eq!(backoff.record_failure("k", at_millis(2_000)), None);
        assert_eq!(backoff.latest_job("k"), Some(&JobId::from("job-2")));
        assert_eq!(backoff.next_attempt("k"), 3);
        assert!(backoff.check_window("k", at_millis(2_001)).is_ok());

        backoff.bind("k", JobId::from("job-3"), None);
        assert_eq!(backoff.record_failure("k", at_millis(3_000)), None);
        assert_eq!(backoff.next_attempt("k"), 4);
        assert_eq!(backoff.remembered_policy("k"), Some(policy));
    }

    #[test]
    fn failure_without_policy_does_not_throttle() {
        let mut backoff = BackoffController::default();
        backoff.bind("k", JobId::from("job-1"), None);

        assert_eq!(backoff.record_failure("k", at_millis(0)), None);
        assert!(backoff.check_window("k", at_millis(0)).is_ok());
    }

    #[test]
    fn success_clears_history() {
        let mut backoff = BackoffController::default();
        backoff.bind("k", JobId::from("job-1"), Some(exponential()));
        backoff.record_failure("k", at_millis(0));
        backoff.bind("k", JobId::from("job-2"), None);
        backoff.record_success("k");

        assert_eq!(backoff.latest_job("k"), None);
        assert_eq!(backoff.next_attempt("k"), 1);
    }

    #[test]
    fn idle_history_is_only_forgotten_after_window() {
        let mut backoff = BackoffController::default();
        let job_id = JobId::from("job-1");
        backoff.bind("k", job_id.clone(), Some(exponential()));
        backoff.record_failure("k", at_millis(0));

        backoff.forget_if_idle("k", &job_id, at_millis(50));
        assert_eq!(backoff.latest_job("k"), Some(&job_id));

        backoff.forget_if_idle("k", &JobId::from("job-other"), at_millis(150));
        assert_eq!(backoff.latest_job("k"), Some(&job_id));

        backoff.forget_if_idle("k", &job_id, at_millis(150));
        assert_eq!(backoff.latest_job("k"), None);
    }
}
