use std::fmt::{Display, Formatter};
use std::time::Duration;

use lease_queue_job::{JobId, TransitionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine readable tag of a [`QueueError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimited,
    Forbidden,
    ResourceNotFound,
    ValidationError,
    ServiceUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by queue providers.
///
/// Every variant maps to one [`ErrorCode`]; callers translating errors to
/// another surface should match on [`QueueError::code`] and read
/// [`QueueError::retry_after`] for throttled requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Admission refused, retry after the given delay
    #[error("{detail}")]
    RateLimited {
        detail: String,
        retry_after: Duration,
    },

    /// The caller does not hold the lease on the job
    #[error("Worker '{worker_id}' is not allowed to modify job {job_id}")]
    Forbidden { job_id: JobId, worker_id: String },

    #[error("Job {job_id} not found")]
    NotFound { job_id: JobId },

    #[error("Invalid request: {0}")]
    Validation(String),

    /// Transient backend failure, safe to retry
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Builds a rate limited error. The delay is clamped to at least one millisecond.
    pub fn rate_limited(detail: impl Into<String>, retry_after: Duration) -> Self {
        QueueError::RateLimited {
            detail: detail.into(),
            retry_after: retry_after.max(Duration::from_millis(1)),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            QueueError::RateLimited { .. } => ErrorCode::RateLimited,
            QueueError::Forbidden { .. } => ErrorCode::Forbidden,
            QueueError::NotFound { .. } => ErrorCode::ResourceNotFound,
            QueueError::Validation(_) => ErrorCode::ValidationError,
            QueueError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            QueueError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            QueueError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Retry delay in whole seconds, rounded up and never below 1.
    ///
    /// Rounding up keeps clients from retrying before the window opens. A delay
    /// bounded by a sub-second cap, such as 1500ms, therefore reports the next
    /// whole second (2) and never more than `ceil(cap)`.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after().map(duration_to_retry_secs)
    }

    pub fn http_status(&self) -> u16 {
        match self.code() {
            ErrorCode::RateLimited => 429,
            ErrorCode::Forbidden => 403,
            ErrorCode::ResourceNotFound => 404,
            ErrorCode::ValidationError => 400,
            ErrorCode::ServiceUnavailable => 503,
            ErrorCode::InternalError => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::RateLimited { .. } | QueueError::ServiceUnavailable(_)
        )
    }

    pub(crate) fn from_transition(job_id: &JobId, error: TransitionError) -> Self {
        match error {
            TransitionError::NotLeaseHolder { worker_id } => QueueError::Forbidden {
                job_id: job_id.clone(),
                worker_id,
            },
            TransitionError::InvalidTransition { from, to } => QueueError::Internal(format!(
                "Job {job_id} cannot move from {from} to {to}"
            )),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(value: serde_json::Error) -> Self {
        QueueError::Internal(format!("Error while serializing job: {value}"))
    }
}

pub(crate) fn duration_to_retry_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

/// A Result type alias for QueueError.
pub type Result<T> = core::result::Result<T, QueueError>;
