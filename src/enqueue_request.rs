use derive_builder::Builder;
use getset::Getters;
use lease_queue_job::{JobPriority, RetryPolicy};
use serde_json::Value;

use crate::errors::{QueueError, Result};

/// A submission to [`crate::QueueProvider::enqueue`].
///
/// ```
/// use lease_queue::{EnqueueRequest, RetryPolicy};
/// use std::time::Duration;
///
/// let request = EnqueueRequest::builder()
///     .job_type("preview")
///     .payload(serde_json::json!({ "url": "https://example.com" }))
///     .idempotency_key("preview:example.com")
///     .retry_policy(RetryPolicy::fixed(3, Duration::from_secs(1)))
///     .build();
///
/// assert_eq!(request.job_type(), "preview");
/// ```
#[derive(Getters, Debug, Clone, PartialEq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct EnqueueRequest {
    /// Tag matched against the types a worker asks for
    #[builder(setter(into))]
    job_type: String,

    /// Opaque JSON object handed to the worker
    #[builder(default = "serde_json::json!({})")]
    payload: Value,

    #[builder(default)]
    priority: JobPriority,

    /// Groups jobs submitted by one inbound request
    #[builder(default, setter(into, strip_option))]
    request_id: Option<String>,

    /// Deduplicates submissions and scopes backoff after failures
    #[builder(default, setter(into, strip_option))]
    idempotency_key: Option<String>,

    #[builder(default, setter(strip_option))]
    retry_policy: Option<RetryPolicy>,

    /// Caller owned data stored alongside the job
    #[builder(default, setter(strip_option))]
    metadata: Option<Value>,
}

impl EnqueueRequest {
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: JobPriority::default(),
            request_id: None,
            idempotency_key: None,
            retry_policy: None,
            metadata: None,
        }
    }

    pub fn builder() -> EnqueueRequestBuilder {
        EnqueueRequestBuilder::default()
    }

    /// Rejects requests no provider should accept.
    pub fn validate(&self) -> Result<()> {
        if self.job_type.trim().is_empty() {
            return Err(QueueError::Validation("Job type must not be empty".into()));
        }
        if !self.payload.is_object() {
            return Err(QueueError::Validation(
                "Job payload must be a JSON object".into(),
            ));
        }
        if self
            .idempotency_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err(QueueError::Validation(
                "Idempotency key must not be empty".into(),
            ));
        }
        if self
            .request_id
            .as_deref()
            .is_some_and(|id| id.trim().is_empty())
        {
            return Err(QueueError::Validation("Request id must not be empty".into()));
        }
        if let Some(metadata) = &self.metadata {
            if !metadata.is_object() {
                return Err(QueueError::Validation(
                    "Job metadata must be a JSON object".into(),
                ));
            }
        }
        if let Some(policy) = &self.retry_policy {
            validate_retry_policy(policy)?;
        }
        Ok(())
    }
}

fn validate_retry_policy(policy: &RetryPolicy) -> Result<()> {
    if policy.max_attempts == 0 {
        return Err(QueueError::Validation(
            "Retry policy max_attempts must be at least 1".into(),
        ));
    }
    if policy.initial_delay.is_zero() {
        return Err(QueueError::Validation(
            "Retry policy initial_delay must be positive".into(),
        ));
    }
    if policy.max_delay < policy.initial_delay {
        return Err(QueueError::Validation(
            "Retry policy max_delay must not be smaller than initial_delay".into(),
        ));
    }
    Ok(())
}

impl EnqueueRequestBuilder {
    /// Builds the request.
    ///
    /// # Panics
    ///
    /// Panics when `job_type` was never set.
    pub fn build(self) -> EnqueueRequest {
        self.build_internal()
            .expect("EnqueueRequest requires a job_type")
    }
}
