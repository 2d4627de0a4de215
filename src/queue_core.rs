use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lease_queue_clock::Clock;
use lease_queue_job::{Job, JobFailure, JobId, JobStatus, JobTransition};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::backoff::BackoffController;
use crate::config::QueueConfig;
use crate::enqueue_request::EnqueueRequest;
use crate::errors::{QueueError, Result};
use crate::lease::LeaseManager;
use crate::rate_limiter::RateLimiter;
use crate::stats::{self, QueueStats};
use crate::store::JobStore;
use crate::utils::sub_duration;

const QUEUE_FULL_RETRY_AFTER: Duration = Duration::from_secs(60);
const REQUEST_LIMIT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// State machine shared by every provider.
///
/// Providers wrap a core in a single lock, so each method here runs as one
/// atomic step. Every operation first hands expired leases back to the queue.
pub(crate) struct QueueCore<S> {
    store: S,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    backoff: BackoffController,
    leases: LeaseManager,
    rate_limiter: Option<RateLimiter>,
    requests: HashMap<String, Vec<JobId>>,
    history: HashMap<JobId, Vec<JobTransition>>,
    next_sequence: u64,
}

impl<S: JobStore> QueueCore<S> {
    pub(crate) fn new(store: S, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            backoff: BackoffController::default(),
            leases: LeaseManager::new(*config.lease_duration()),
            rate_limiter: config.rate_limit().map(RateLimiter::new),
            requests: HashMap::new(),
            history: HashMap::new(),
            next_sequence: 0,
            config,
        }
    }

    pub(crate) fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn load(&self, job_id: &JobId) -> Result<Job> {
        self.store
            .get(job_id)?
            .ok_or_else(|| QueueError::NotFound {
                job_id: job_id.clone(),
            })
    }

    fn record_transition(&mut self, job_id: &JobId, transition: JobTransition) {
        self.history
            .entry(job_id.clone())
            .or_default()
            .push(transition);
    }

    fn reclaim_expired(&mut self, now: DateTime<Utc>) -> Result<()> {
        for job_id in self.leases.expired(now) {
            self.leases.release(&job_id);
            let Some(mut job) = self.store.get(&job_id)? else {
                continue;
            };
            if !job.is_lease_expired(now) {
                continue;
            }

            let worker_id = job.assigned_worker().clone();
            job.requeue(now)
                .map_err(|e| QueueError::from_transition(&job_id, e))?;
            self.leases.push_ready(&job);
            self.store.put(job)?;
            self.record_transition(
                &job_id,
                JobTransition::new(JobStatus::Processing, JobStatus::Queued, now).with_metadata(
                    json!({ "reason": "lease_expired", "worker_id": worker_id.as_deref() }),
                ),
            );
            debug!(
                job_id = %job_id,
                worker_id = worker_id.as_deref().unwrap_or_default(),
                "Lease expired, job returned to the queue"
            );
        }
        Ok(())
    }

    fn live_job_for_key(&self, key: &str) -> Result<Option<Job>> {
        let Some(job_id) = self.backoff.latest_job(key) else {
            return Ok(None);
        };
        Ok(self.store.get(job_id)?.filter(|job| !job.is_terminal()))
    }

    fn check_admission(&mut self, request: &EnqueueRequest, now: DateTime<Utc>) -> Result<()> {
        if let Some(limiter) = self.rate_limiter.as_mut() {
            limiter.check(now)?;
        }

        if let Some(max_size) = *self.config.max_queue_size() {
            if self.leases.ready_len() >= max_size {
                return Err(QueueError::rate_limited(
                    format!("Queue is full ({max_size} jobs waiting)"),
                    QUEUE_FULL_RETRY_AFTER,
                ));
            }
        }

        if let (Some(max_jobs), Some(request_id)) =
            (*self.config.max_jobs_per_request(), request.request_id())
        {
            let tracked = self.requests.get(request_id).map_or(0, Vec::len);
            if tracked >= max_jobs {
                return Err(QueueError::rate_limited(
                    format!("Request limit exceeded ({max_jobs} jobs per request)"),
                    REQUEST_LIMIT_RETRY_AFTER,
                ));
            }
        }

        Ok(())
    }

    pub(crate) fn enqueue(&mut self, request: EnqueueRequest) -> Result<Job> {
        request.validate()?;
        let now = self.now();
        self.reclaim_expired(now)?;

        let key = request.idempotency_key().as_deref();
        if let Some(key) = key {
            if let Some(existing) = self.live_job_for_key(key)? {
                debug!(job_id = %existing.id(), idempotency_key = key, "Returning live job for idempotency key");
                return Ok(existing);
            }
            if let Err(e) = self.backoff.check_window(key, now) {
                warn!(idempotency_key = key, retry_after = ?e.retry_after(), "Resubmission refused during backoff");
                return Err(e);
            }
        }
        if let Err(e) = self.check_admission(&request, now) {
            warn!(job_type = %request.job_type(), error = %e, "Enqueue refused");
            return Err(e);
        }

        let attempt = key.map_or(1, |k| self.backoff.next_attempt(k));
        let retry_policy = request
            .retry_policy()
            .or_else(|| key.and_then(|k| self.backoff.remembered_policy(k)));

        let job = Job::builder()
            .job_type(request.job_type().clone())
            .priority(*request.priority())
            .payload(request.payload().clone())
            .idempotency_key(request.idempotency_key().clone())
            .request_id(request.request_id().clone())
            .retry_policy(retry_policy)
            .metadata(request.metadata().clone())
            .attempt(attempt)
            .sequence(self.next_sequence)
            .created_at(now)
            .updated_at(now)
            .build();
        self.store.put(job.clone())?;

        self.next_sequence += 1;
        self.leases.push_ready(&job);
        if let Some(limiter) = self.rate_limiter.as_mut() {
            limiter.record(now);
        }
        if let Some(key) = key {
            self.backoff.bind(key, job.id().clone(), retry_policy);
        }
        if let Some(request_id) = job.request_id() {
            self.requests
                .entry(request_id.clone())
                .or_default()
                .push(job.id().clone());
        }

        info!(
            job_id = %job.id(),
            job_type = %job.job_type(),
            attempt,
            "Job enqueued"
        );
        Ok(job)
    }

    pub(crate) fn reserve(
        &mut self,
        worker_id: &str,
        job_types: Option<&[&str]>,
    ) -> Result<Option<Job>> {
        if worker_id.trim().is_empty() {
            return Err(QueueError::Validation("Worker id must not be empty".into()));
        }
        let now = self.now();
        self.reclaim_expired(now)?;

        let Some(job_id) = self.leases.select(job_types) else {
            debug!(worker_id, ?job_types, "No job available");
            return Ok(None);
        };

        let mut job = self.load(&job_id)?;
        self.leases.remove_ready(&job);
        job.reserve(worker_id, now, self.leases.deadline(now))
            .map_err(|e| QueueError::from_transition(&job_id, e))?;
        self.leases.track(&job);
        self.store.put(job.clone())?;
        self.record_transition(
            &job_id,
            JobTransition::new(JobStatus::Queued, JobStatus::Processing, now)
                .with_metadata(json!({ "worker_id": worker_id })),
        );

        debug!(job_id = %job_id, worker_id, job_type = %job.job_type(), "Job reserved");
        Ok(Some(job))
    }

    pub(crate) fn heartbeat(
        &mut self,
        job_id: &JobId,
        worker_id: &str,
        progress: Option<u8>,
    ) -> Result<Job> {
        let now = self.now();
        self.reclaim_expired(now)?;

        let mut job = self.load(job_id)?;
        self.leases.authorize(&job, worker_id)?;
        job.heartbeat(worker_id, progress, now, self.leases.deadline(now))
            .map_err(|e| QueueError::from_transition(job_id, e))?;
        self.leases.track(&job);
        self.store.put(job.clone())?;

        Ok(job)
    }

    pub(crate) fn complete(
        &mut self,
        job_id: &JobId,
        worker_id: &str,
        result: Value,
    ) -> Result<Job> {
        let now = self.now();
        self.reclaim_expired(now)?;

        let mut job = self.load(job_id)?;
        self.leases.authorize(&job, worker_id)?;
        job.complete(worker_id, result, now)
            .map_err(|e| QueueError::from_transition(job_id, e))?;
        self.store.put(job.clone())?;
        self.record_transition(
            job_id,
            JobTransition::new(JobStatus::Processing, JobStatus::Completed, now)
                .with_metadata(json!({ "worker_id": worker_id })),
        );

        self.leases.release(job_id);
        if let Some(key) = job.idempotency_key() {
            if self.backoff.latest_job(key) == Some(job_id) {
                self.backoff.record_success(key);
            }
        }

        info!(job_id = %job_id, worker_id, "Job completed");
        Ok(job)
    }

    pub(crate) fn fail(
        &mut self,
        job_id: &JobId,
        worker_id: &str,
        mut failure: JobFailure,
    ) -> Result<Job> {
        let now = self.now();
        self.reclaim_expired(now)?;

        let mut job = self.load(job_id)?;
        self.leases.authorize(&job, worker_id)?;

        failure.retry_after = match job.idempotency_key() {
            Some(key) if self.backoff.latest_job(key) == Some(job_id) => {
                self.backoff.record_failure(key, now)
            }
            _ => None,
        };
        let error_code = failure.code.clone();
        job.fail(worker_id, failure, now)
            .map_err(|e| QueueError::from_transition(job_id, e))?;
        self.store.put(job.clone())?;
        self.leases.release(job_id);
        self.record_transition(
            job_id,
            JobTransition::new(JobStatus::Processing, JobStatus::Failed, now)
                .with_metadata(json!({ "worker_id": worker_id, "error_code": error_code })),
        );

        info!(
            job_id = %job_id,
            worker_id,
            attempt = job.attempt(),
            retry_after = ?job.error().as_ref().and_then(|e| e.retry_after),
            "Job failed"
        );
        Ok(job)
    }

    pub(crate) fn get_job(&mut self, job_id: &JobId) -> Result<Option<Job>> {
        let now = self.now();
        self.reclaim_expired(now)?;
        self.store.get(job_id)
    }

    /// Transitions of a job, oldest first. Unknown jobs have no history.
    pub(crate) fn get_job_history(&mut self, job_id: &JobId) -> Result<Vec<JobTransition>> {
        let now = self.now();
        self.reclaim_expired(now)?;
        Ok(self.history.get(job_id).cloned().unwrap_or_default())
    }

    pub(crate) fn get_stats(&mut self) -> Result<QueueStats> {
        let now = self.now();
        self.reclaim_expired(now)?;
        let jobs = self.store.jobs()?;
        Ok(QueueStats::tally(&jobs))
    }

    /// Removes terminal jobs last updated more than `max_age` ago.
    pub(crate) fn clean_old_jobs(&mut self, max_age: Duration) -> Result<usize> {
        let now = self.now();
        self.reclaim_expired(now)?;
        let threshold = sub_duration(now, max_age);

        let expired: Vec<Job> = self
            .store
            .jobs()?
            .into_iter()
            .filter(|job| stats::is_expired(job, threshold))
            .collect();

        for job in &expired {
            self.store.remove(job.id())?;
            self.history.remove(job.id());
            if let Some(request_id) = job.request_id() {
                if let Some(job_ids) = self.requests.get_mut(request_id) {
                    job_ids.retain(|id| id != job.id());
                    if job_ids.is_empty() {
                        self.requests.remove(request_id);
                    }
                }
            }
            if let Some(key) = job.idempotency_key() {
                self.backoff.forget_if_idle(key, job.id(), now);
            }
        }

        if !expired.is_empty() {
            info!(removed = expired.len(), "Cleaned old jobs");
        }
        Ok(expired.len())
    }

    pub(crate) fn get_request_job_count(&self, request_id: &str) -> usize {
        self.requests.get(request_id).map_or(0, Vec::len)
    }

    pub(crate) fn get_request_jobs(&mut self, request_id: &str) -> Result<Vec<Job>> {
        let now = self.now();
        self.reclaim_expired(now)?;

        let Some(job_ids) = self.requests.get(request_id) else {
            return Ok(Vec::new());
        };
        let mut jobs = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            if let Some(job) = self.store.get(job_id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    pub(crate) fn reset(&mut self) {
        self.store.clear();
        self.backoff.clear();
        self.leases.clear();
        self.requests.clear();
        self.history.clear();
        if let Some(limiter) = self.rate_limiter.as_mut() {
            limiter.reset();
        }
        self.next_sequence = 0;
        info!("Queue reset");
    }
}
