use std::fmt::{Display, Formatter};
use std::time::Duration;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

mod retry_policy;

pub use retry_policy::{BackoffStrategy, RetryPolicy};

/// Opaque job identifier, rendered as `job-<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh, time-ordered identifier.
    pub fn generate() -> Self {
        Self(format!("job-{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle state of a job.
///
/// `Queued → Processing → Completed | Failed`. The only way back is
/// `Processing → Queued`, used when a lease is reclaimed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Queued)
        )
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{display}")
    }
}

/// Priority tag carried by a job. Reservation order stays first in, first out.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Failure details reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Machine readable failure code
    pub code: String,
    /// Human readable description
    pub message: String,
    /// Optional hint on how to resolve the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    /// Set by the queue when a backoff window was armed for the job's key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
}

impl JobFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            fix: None,
            retry_after: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

impl Display for JobFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// One status change in a job's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
    /// Context of the change, such as the worker involved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl JobTransition {
    pub fn new(from: JobStatus, to: JobStatus, at: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            at,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Rejected state change on a [`Job`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Illegal job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Worker '{worker_id}' does not hold the lease")]
    NotLeaseHolder { worker_id: String },
}

/// A unit of work owned by a queue provider.
///
/// Fields are read through getters; every mutation goes through one of the
/// transition methods so the state machine invariants hold wherever a job is
/// stored.
#[derive(Getters, Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct Job {
    #[builder(default = "JobId::generate()")]
    id: JobId,
    /// Tag used to filter reservations
    #[builder(default, setter(into))]
    job_type: String,
    #[builder(default)]
    status: JobStatus,
    #[builder(default)]
    priority: JobPriority,
    /// Caller owned data, never interpreted by the queue
    #[builder(default = "serde_json::json!({})")]
    payload: Value,
    #[builder(default, setter(into))]
    idempotency_key: Option<String>,
    #[builder(default, setter(into))]
    request_id: Option<String>,
    #[builder(default, setter(into))]
    retry_policy: Option<RetryPolicy>,
    /// 0 to 100, only moved forward by the lease holder
    #[builder(default)]
    progress: u8,
    #[builder(default, setter(into))]
    result: Option<Value>,
    #[builder(default, setter(into))]
    error: Option<JobFailure>,
    #[builder(default, setter(into))]
    assigned_worker: Option<String>,
    /// 1-based attempt number within the idempotency key history
    #[builder(default = "1")]
    attempt: u32,
    #[builder(default, setter(into))]
    metadata: Option<Value>,
    /// Insertion order inside the owning provider
    #[builder(default)]
    sequence: u64,
    #[builder(default = "Utc::now()")]
    created_at: DateTime<Utc>,
    #[builder(default = "Utc::now()")]
    updated_at: DateTime<Utc>,
    #[builder(default, setter(into))]
    started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(into))]
    completed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(into))]
    lease_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a new builder for constructing a `Job`.
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Checks that `worker_id` currently holds the lease on this job.
    pub fn ensure_lease_holder(&self, worker_id: &str) -> Result<(), TransitionError> {
        match (&self.status, &self.assigned_worker) {
            (JobStatus::Processing, Some(holder)) if holder == worker_id => Ok(()),
            _ => Err(TransitionError::NotLeaseHolder {
                worker_id: worker_id.to_string(),
            }),
        }
    }

    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self
                .lease_expires_at
                .is_some_and(|expires_at| expires_at <= now)
    }

    /// Time spent between reservation and the terminal transition.
    pub fn processing_time(&self) -> Option<Duration> {
        let started_at = self.started_at?;
        let completed_at = self.completed_at?;
        (completed_at - started_at).to_std().ok()
    }

    /// `Queued → Processing`, binding the lease to `worker_id`.
    pub fn reserve(
        &mut self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), TransitionError> {
        self.transition(JobStatus::Processing, now)?;
        self.assigned_worker = Some(worker_id.to_string());
        self.started_at = Some(now);
        self.lease_expires_at = lease_expires_at;
        Ok(())
    }

    /// Records a heartbeat from the lease holder.
    ///
    /// Progress is clamped to 100 and never decreases.
    pub fn heartbeat(
        &mut self,
        worker_id: &str,
        progress: Option<u8>,
        now: DateTime<Utc>,
        lease_expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), TransitionError> {
        self.ensure_lease_holder(worker_id)?;
        if let Some(progress) = progress {
            self.progress = self.progress.max(progress.min(100));
        }
        self.updated_at = now;
        self.lease_expires_at = lease_expires_at;
        Ok(())
    }

    /// `Processing → Completed`.
    pub fn complete(
        &mut self,
        worker_id: &str,
        result: Value,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_lease_holder(worker_id)?;
        self.transition(JobStatus::Completed, now)?;
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
        self.release_lease(now);
        Ok(())
    }

    /// `Processing → Failed`.
    pub fn fail(
        &mut self,
        worker_id: &str,
        failure: JobFailure,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_lease_holder(worker_id)?;
        self.transition(JobStatus::Failed, now)?;
        self.error = Some(failure);
        self.result = None;
        self.release_lease(now);
        Ok(())
    }

    /// `Processing → Queued` after the lease expired.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Queued, now)?;
        self.progress = 0;
        self.assigned_worker = None;
        self.started_at = None;
        self.lease_expires_at = None;
        Ok(())
    }

    fn transition(&mut self, to: JobStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    fn release_lease(&mut self, now: DateTime<Utc>) {
        self.assigned_worker = None;
        self.lease_expires_at = None;
        self.completed_at = Some(now);
    }
}

impl JobBuilder {
    /// Builds the Job with all configured values.
    pub fn build(self) -> Job {
        self.build_internal()
            .expect("All fields have defaults, build should never fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn queued_job() -> Job {
        Job::builder()
            .job_type("test")
            .created_at(at(0))
            .updated_at(at(0))
            .build()
    }

    #[test]
    fn builder_defaults() {
        let job = Job::builder().job_type("preview").build();

        assert!(job.id().as_str().starts_with("job-"));
        assert_eq!(job.status(), &JobStatus::Queued);
        assert_eq!(job.priority(), &JobPriority::Normal);
        assert_eq!(job.payload(), &serde_json::json!({}));
        assert_eq!(job.progress(), &0);
        assert_eq!(job.attempt(), &1);
        assert_eq!(job.assigned_worker(), &None);
    }

    #[test]
    fn full_success_lifecycle() {
        let mut job = queued_job();

        job.reserve("worker-1", at(1), Some(at(31))).unwrap();
        assert_eq!(job.status(), &JobStatus::Processing);
        assert_eq!(job.assigned_worker(), &Some("worker-1".to_string()));
        assert_eq!(job.lease_expires_at(), &Some(at(31)));

        job.heartbeat("worker-1", Some(40), at(2), Some(at(32))).unwrap();
        assert_eq!(job.progress(), &40);

        job.complete("worker-1", serde_json::json!({ "ok": true }), at(5))
            .unwrap();
        assert_eq!(job.status(), &JobStatus::Completed);
        assert_eq!(job.progress(), &100);
        assert_eq!(job.result(), &Some(serde_json::json!({ "ok": true })));
        assert_eq!(job.assigned_worker(), &None);
        assert_eq!(job.processing_time(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn progress_never_goes_backwards() {
        let mut job = queued_job();
        job.reserve("w", at(1), None).unwrap();

        job.heartbeat("w", Some(60), at(2), None).unwrap();
        job.heartbeat("w", Some(20), at(3), None).unwrap();
        assert_eq!(job.progress(), &60);

        job.heartbeat("w", Some(250), at(4), None).unwrap();
        assert_eq!(job.progress(), &100);

        job.heartbeat("w", None, at(5), None).unwrap();
        assert_eq!(job.progress(), &100);
        assert_eq!(job.updated_at(), &at(5));
    }

    #[test]
    fn only_lease_holder_may_mutate() {
        let mut job = queued_job();
        job.reserve("worker-1", at(1), None).unwrap();

        let err = job
            .heartbeat("worker-2", Some(10), at(2), None)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::NotLeaseHolder {
                worker_id: "worker-2".to_string()
            }
        );
        assert!(job
            .complete("worker-2", Value::Null, at(2))
            .is_err());
        assert!(job
            .fail("worker-2", JobFailure::new("E", "nope"), at(2))
            .is_err());
        assert_eq!(job.status(), &JobStatus::Processing);
    }

    #[test]
    fn queued_job_cannot_terminate() {
        let mut job = queued_job();

        assert!(matches!(
            job.complete("w", Value::Null, at(1)),
            Err(TransitionError::NotLeaseHolder { .. })
        ));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = queued_job();
        job.reserve("w", at(1), None).unwrap();
        job.fail("w", JobFailure::new("E", "boom"), at(2)).unwrap();

        assert_eq!(
            job.requeue(at(3)),
            Err(TransitionError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Queued
            })
        );
        assert!(job.reserve("w", at(3), None).is_err());
        assert_eq!(job.error(), &Some(JobFailure::new("E", "boom")));
        assert_eq!(job.result(), &None);
    }

    #[test]
    fn requeue_resets_lease_and_progress() {
        let mut job = queued_job();
        job.reserve("w", at(1), Some(at(31))).unwrap();
        job.heartbeat("w", Some(70), at(2), Some(at(32))).unwrap();

        assert!(!job.is_lease_expired(at(31)));
        assert!(job.is_lease_expired(at(32)));

        job.requeue(at(33)).unwrap();
        assert_eq!(job.status(), &JobStatus::Queued);
        assert_eq!(job.progress(), &0);
        assert_eq!(job.assigned_worker(), &None);
        assert!(!job.is_lease_expired(at(100)));
    }

    #[test]
    fn job_survives_json_round_trip() {
        let mut job = Job::builder()
            .job_type("export")
            .idempotency_key("key-1".to_string())
            .retry_policy(RetryPolicy::fixed(3, Duration::from_secs(1)))
            .payload(serde_json::json!({ "a": 1 }))
            .build();
        job.reserve("w", at(1), Some(at(31))).unwrap();

        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: Job = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn transition_serializes_lowercase_statuses() {
        let transition = JobTransition::new(JobStatus::Queued, JobStatus::Processing, at(1));
        let encoded = serde_json::to_value(&transition).unwrap();

        assert_eq!(encoded["from"], "queued");
        assert_eq!(encoded["to"], "processing");
        assert!(encoded.get("metadata").is_none());

        let with_worker = transition.with_metadata(serde_json::json!({ "worker_id": "w" }));
        let decoded: JobTransition =
            serde_json::from_value(serde_json::to_value(&with_worker).unwrap()).unwrap();
        assert_eq!(decoded, with_worker);
    }
}
