use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lease_queue_clock::{Clock, SystemClock};
use lease_queue_job::{Job, JobFailure, JobId, JobTransition};
use serde_json::Value;

use crate::config::{ProviderKind, QueueConfig};
use crate::enqueue_request::EnqueueRequest;
use crate::errors::Result;
use crate::providers::in_memory::InMemoryQueueProvider;
use crate::providers::simulated_durable::SimulatedDurableQueueProvider;
use crate::stats::QueueStats;

/// Contract every queue backend fulfils.
///
/// All operations are atomic with respect to each other on one provider
/// instance. None of them blocks waiting for work: `reserve` answers `None`
/// when nothing matches.
pub trait QueueProvider: Send + Sync {
    /// Admits a job, or returns the live job already owning the request's idempotency key.
    fn enqueue(&self, request: EnqueueRequest) -> impl Future<Output = Result<Job>> + Send;

    /// Leases the oldest queued job whose type is in `job_types` (any type when `None`).
    fn reserve(
        &self,
        worker_id: &str,
        job_types: Option<&[&str]>,
    ) -> impl Future<Output = Result<Option<Job>>> + Send;

    /// Reports liveness and optional progress for a leased job.
    fn heartbeat(
        &self,
        job_id: &JobId,
        worker_id: &str,
        progress: Option<u8>,
    ) -> impl Future<Output = Result<Job>> + Send;

    fn complete(
        &self,
        job_id: &JobId,
        worker_id: &str,
        result: Value,
    ) -> impl Future<Output = Result<Job>> + Send;

    /// Fails a leased job. The returned job's error carries the backoff delay
    /// armed for its idempotency key, if any.
    fn fail(
        &self,
        job_id: &JobId,
        worker_id: &str,
        failure: JobFailure,
    ) -> impl Future<Output = Result<Job>> + Send;

    fn get_job(&self, job_id: &JobId) -> impl Future<Output = Result<Option<Job>>> + Send;

    /// Status changes of a job, oldest first. Empty when the job is unknown.
    fn get_job_history(
        &self,
        job_id: &JobId,
    ) -> impl Future<Output = Result<Vec<JobTransition>>> + Send;

    fn get_stats(&self) -> impl Future<Output = Result<QueueStats>> + Send;

    /// Deletes terminal jobs not updated within `max_age` and returns how many were removed.
    fn clean_old_jobs(&self, max_age: Duration) -> impl Future<Output = Result<usize>> + Send;

    fn get_request_job_count(&self, request_id: &str)
        -> impl Future<Output = Result<usize>> + Send;

    fn get_request_jobs(&self, request_id: &str) -> impl Future<Output = Result<Vec<Job>>> + Send;

    /// Drops every job and all bookkeeping.
    fn reset(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Provider picked at runtime from a [`ProviderKind`].
pub enum QueueBackend {
    InMemory(InMemoryQueueProvider),
    SimulatedDurable(SimulatedDurableQueueProvider),
}

impl QueueBackend {
    pub fn kind(&self) -> ProviderKind {
        match self {
            QueueBackend::InMemory(_) => ProviderKind::InMemory,
            QueueBackend::SimulatedDurable(_) => ProviderKind::SimulatedDurable,
        }
    }

    /// Builds the backend named by `config.provider()` on top of `clock`.
    pub fn with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        match config.provider() {
            ProviderKind::InMemory => {
                QueueBackend::InMemory(InMemoryQueueProvider::with_clock(config, clock))
            }
            ProviderKind::SimulatedDurable => QueueBackend::SimulatedDurable(
                SimulatedDurableQueueProvider::with_clock(config, clock),
            ),
        }
    }
}

impl From<InMemoryQueueProvider> for QueueBackend {
    fn from(value: InMemoryQueueProvider) -> Self {
        QueueBackend::InMemory(value)
    }
}

impl From<SimulatedDurableQueueProvider> for QueueBackend {
    fn from(value: SimulatedDurableQueueProvider) -> Self {
        QueueBackend::SimulatedDurable(value)
    }
}

/// Builds the provider selected by `config` using the system clock.
pub fn create_queue_provider(config: QueueConfig) -> QueueBackend {
    QueueBackend::with_clock(config, Arc::new(SystemClock))
}

macro_rules! dispatch {
    ($self:ident, $provider:ident => $call:expr) => {
        match $self {
            QueueBackend::InMemory($provider) => $call.await,
            QueueBackend::SimulatedDurable($provider) => $call.await,
        }
    };
}

impl QueueProvider for QueueBackend {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<Job> {
        dispatch!(self, p => p.enqueue(request))
    }

    async fn reserve(&self, worker_id: &str, job_types: Option<&[&str]>) -> Result<Option<Job>> {
        dispatch!(self, p => p.reserve(worker_id, job_types))
    }

    async fn heartbeat(
        &self,
        job_id: &JobId,
        worker_id: &str,
        progress: Option<u8>,
    ) -> Result<Job> {
        dispatch!(self, p => p.heartbeat(job_id, worker_id, progress))
    }

    async fn complete(&self, job_id: &JobId, worker_id: &str, result: Value) -> Result<Job> {
        dispatch!(self, p => p.complete(job_id, worker_id, result))
    }

    async fn fail(&self, job_id: &JobId, worker_id: &str, failure: JobFailure) -> Result<Job> {
        dispatch!(self, p => p.fail(job_id, worker_id, failure))
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        dispatch!(self, p => p.get_job(job_id))
    }

    async fn get_job_history(&self, job_id: &JobId) -> Result<Vec<JobTransition>> {
        dispatch!(self, p => p.get_job_history(job_id))
    }

    async fn get_stats(&self) -> Result<QueueStats> {
        dispatch!(self, p => p.get_stats())
    }

    async fn clean_old_jobs(&self, max_age: Duration) -> Result<usize> {
        dispatch!(self, p => p.clean_old_jobs(max_age))
    }

    async fn get_request_job_count(&self, request_id: &str) -> Result<usize> {
        dispatch!(self, p => p.get_request_job_count(request_id))
    }

    async fn get_request_jobs(&self, request_id: &str) -> Result<Vec<Job>> {
        dispatch!(self, p => p.get_request_jobs(request_id))
    }

    async fn reset(&self) -> Result<()> {
        dispatch!(self, p => p.reset())
    }
}

impl<P: QueueProvider> QueueProvider for Arc<P> {
    fn enqueue(&self, request: EnqueueRequest) -> impl Future<Output = Result<Job>> + Send {
        P::enqueue(self, request)
    }

    fn reserve(
        &self,
        worker_id: &str,
        job_types: Option<&[&str]>,
    ) -> impl Future<Output = Result<Option<Job>>> + Send {
        P::reserve(self, worker_id, job_types)
    }

    fn heartbeat(
        &self,
        job_id: &JobId,
        worker_id: &str,
        progress: Option<u8>,
    ) -> impl Future<Output = Result<Job>> + Send {
        P::heartbeat(self, job_id, worker_id, progress)
    }

    fn complete(
        &self,
        job_id: &JobId,
        worker_id: &str,
        result: Value,
    ) -> impl Future<Output = Result<Job>> + Send {
        P::complete(self, job_id, worker_id, result)
    }

    fn fail(
        &self,
        job_id: &JobId,
        worker_id: &str,
        failure: JobFailure,
    ) -> impl Future<Output = Result<Job>> + Send {
        P::fail(self, job_id, worker_id, failure)
    }

    fn get_job(&self, job_id: &JobId) -> impl Future<Output = Result<Option<Job>>> + Send {
        P::get_job(self, job_id)
    }

    fn get_job_history(
        &self,
        job_id: &JobId,
    ) -> impl Future<Output = Result<Vec<JobTransition>>> + Send {
        P::get_job_history(self, job_id)
    }

    fn get_stats(&self) -> impl Future<Output = Result<QueueStats>> + Send {
        P::get_stats(self)
    }

    fn clean_old_jobs(&self, max_age: Duration) -> impl Future<Output = Result<usize>> + Send {
        P::clean_old_jobs(self, max_age)
    }

    fn get_request_job_count(
        &self,
        request_id: &str,
    ) -> impl Future<Output = Result<usize>> + Send {
        P::get_request_job_count(self, request_id)
    }

    fn get_request_jobs(&self, request_id: &str) -> impl Future<Output = Result<Vec<Job>>> + Send {
        P::get_request_jobs(self, request_id)
    }

    fn reset(&self) -> impl Future<Output = Result<()>> + Send {
        P::reset(self)
    }
}
