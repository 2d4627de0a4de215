use std::sync::Arc;
use std::time::Duration;

use lease_queue_clock::{Clock, SystemClock};
use lease_queue_job::{Job, JobFailure, JobId, JobTransition};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::QueueConfig;
use crate::enqueue_request::EnqueueRequest;
use crate::errors::Result;
use crate::provider::QueueProvider;
use crate::queue_core::QueueCore;
use crate::stats::QueueStats;
use crate::store::MemoryStore;

/// Queue held in process memory as typed job records.
pub struct InMemoryQueueProvider {
    core: Mutex<QueueCore<MemoryStore>>,
}

impl InMemoryQueueProvider {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            core: Mutex::new(QueueCore::new(MemoryStore::default(), config, clock)),
        }
    }

    pub async fn config(&self) -> QueueConfig {
        self.core.lock().await.config().clone()
    }
}

impl Default for InMemoryQueueProvider {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl QueueProvider for InMemoryQueueProvider {
    #[tracing::instrument(
        "enqueue",
        skip_all,
        fields(queue.provider = "inmemory", job_type = %request.job_type())
    )]
    async fn enqueue(&self, request: EnqueueRequest) -> Result<Job> {
        self.core.lock().await.enqueue(request)
    }

    #[tracing::instrument(
        "reserve",
        skip_all,
        fields(queue.provider = "inmemory", worker_id = %worker_id)
    )]
    async fn reserve(&self, worker_id: &str, job_types: Option<&[&str]>) -> Result<Option<Job>> {
        self.core.lock().await.reserve(worker_id, job_types)
    }

    #[tracing::instrument(
        "heartbeat",
        skip_all,
        fields(queue.provider = "inmemory", job_id = %job_id, worker_id = %worker_id)
    )]
    async fn heartbeat(
        &self,
        job_id: &JobId,
        worker_id: &str,
        progress: Option<u8>,
    ) -> Result<Job> {
        self.core.lock().await.heartbeat(job_id, worker_id, progress)
    }

    #[tracing::instrument(
        "complete",
        skip_all,
        fields(queue.provider = "inmemory", job_id = %job_id, worker_id = %worker_id)
    )]
    async fn complete(&self, job_id: &JobId, worker_id: &str, result: Value) -> Result<Job> {
        self.core.lock().await.complete(job_id, worker_id, result)
    }

    #[tracing::instrument(
        "fail",
        skip_all,
        fields(queue.provider = "inmemory", job_id = %job_id, worker_id = %worker_id)
    )]
    async fn fail(&self, job_id: &JobId, worker_id: &str, failure: JobFailure) -> Result<Job> {
        self.core.lock().await.fail(job_id, worker_id, failure)
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        self.core.lock().await.get_job(job_id)
    }

    async fn get_job_history(&self, job_id: &JobId) -> Result<Vec<JobTransition>> {
        self.core.lock().await.get_job_history(job_id)
    }

    async fn get_stats(&self) -> Result<QueueStats> {
        self.core.lock().await.get_stats()
    }

    #[tracing::instrument("clean_old_jobs", skip(self), fields(queue.provider = "inmemory"))]
    async fn clean_old_jobs(&self, max_age: Duration) -> Result<usize> {
        self.core.lock().await.clean_old_jobs(max_age)
    }

    async fn get_request_job_count(&self, request_id: &str) -> Result<usize> {
        Ok(self.core.lock().await.get_request_job_count(request_id))
    }

    async fn get_request_jobs(&self, request_id: &str) -> Result<Vec<Job>> {
        self.core.lock().await.get_request_jobs(request_id)
    }

    async fn reset(&self) -> Result<()> {
        self.core.lock().await.reset();
        Ok(())
    }
}
