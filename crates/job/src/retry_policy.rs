use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the delay between two attempts grows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Every retry waits `initial_delay`.
    Fixed,
    /// Retry `n` waits `initial_delay * n`.
    Linear,
    /// Retry `n` waits `initial_delay * 2^(n-1)`.
    #[default]
    Exponential,
}

impl Display for BackoffStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Linear => "linear",
            BackoffStrategy::Exponential => "exponential",
        };
        write!(f, "{display}")
    }
}

/// Retry configuration attached to a submission.
///
/// The policy does not re-run anything by itself. After a failure it decides how
/// long a resubmission under the same idempotency key is refused, and how many
/// failures the key may accumulate before it is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failures allowed for one key before no further backoff window is armed.
    pub max_attempts: u32,
    pub backoff_strategy: BackoffStrategy,
    pub initial_delay: Duration,
    /// Upper bound for any computed delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff_strategy: BackoffStrategy::Fixed,
            initial_delay: delay,
            max_delay: delay,
        }
    }

    pub fn linear(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff_strategy: BackoffStrategy::Linear,
            initial_delay,
            max_delay,
        }
    }

    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff_strategy: BackoffStrategy::Exponential,
            initial_delay,
            max_delay,
        }
    }

    /// Overrides the cap applied to computed delays.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    ///
    /// An attempt of 0 is treated as the first one. The result never exceeds
    /// `max_delay`, overflow included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => Some(self.initial_delay),
            BackoffStrategy::Linear => self.initial_delay.checked_mul(attempt),
            BackoffStrategy::Exponential => 2u32
                .checked_pow(attempt - 1)
                .and_then(|factor| self.initial_delay.checked_mul(factor)),
        };

        delay.map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether a key that has failed `failures` times may still be retried.
    pub fn allows_retry_after(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}
