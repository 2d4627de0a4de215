use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use getset::Getters;
use lease_queue_job::{Job, JobFailure, JobId};
use lease_queue_shutdown_signal::{shutdown_signal, ShutdownSignal};
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::errors::QueueError;
use crate::provider::QueueProvider;
use crate::retention::{spawn_retention_sweep, RetentionSweep};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Type-erased job handler.
///
/// Resolves to the job result on success, or to the failure reported to the queue.
pub type WorkerFn<P> =
    Box<dyn Fn(JobContext<P>) -> BoxFuture<'static, Result<Value, JobFailure>> + Send + Sync>;

/// Handle given to a job handler while it holds the lease.
pub struct JobContext<P> {
    job: Arc<Job>,
    provider: Arc<P>,
    worker_id: Arc<str>,
    lease_lost: CancellationToken,
}

impl<P> Clone for JobContext<P> {
    fn clone(&self) -> Self {
        Self {
            job: self.job.clone(),
            provider: self.provider.clone(),
            worker_id: self.worker_id.clone(),
            lease_lost: self.lease_lost.clone(),
        }
    }
}

impl<P: QueueProvider> JobContext<P> {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn payload(&self) -> &Value {
        self.job.payload()
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Cancelled when the worker loses the lease on this job.
    pub fn lease_lost(&self) -> &CancellationToken {
        &self.lease_lost
    }

    /// Reports progress, which also renews the lease.
    pub async fn progress(&self, progress: u8) -> Result<(), QueueError> {
        let result = self
            .provider
            .heartbeat(self.job.id(), &self.worker_id, Some(progress))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if is_lease_lost(&e) {
                    self.lease_lost.cancel();
                }
                Err(e)
            }
        }
    }
}

fn is_lease_lost(error: &QueueError) -> bool {
    matches!(
        error,
        QueueError::Forbidden { .. } | QueueError::NotFound { .. }
    )
}

/// Errors that can occur when initializing a worker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerBuildError {
    #[error("Missing queue provider")]
    MissingProvider,

    #[error("At least one job handler must be defined")]
    NoJobsDefined,

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Errors that stop a running worker.
#[derive(Error, Debug)]
pub enum WorkerRuntimeError {
    #[error("Queue error while processing jobs: {0}")]
    Queue(#[from] QueueError),
}

/// Configuration of a [`Worker`].
pub struct WorkerOptions<P> {
    provider: Option<Arc<P>>,
    worker_id: Option<String>,
    poll_interval: Option<Duration>,
    heartbeat_interval: Option<Duration>,
    jobs: HashMap<String, WorkerFn<P>>,
    shutdown_signal: Option<ShutdownSignal>,
    retention_sweep: Option<RetentionSweep>,
}

impl<P> Default for WorkerOptions<P> {
    fn default() -> Self {
        Self {
            provider: None,
            worker_id: None,
            poll_interval: None,
            heartbeat_interval: None,
            jobs: HashMap::new(),
            shutdown_signal: None,
            retention_sweep: None,
        }
    }
}

impl<P: QueueProvider + 'static> WorkerOptions<P> {
    pub fn init(self) -> Result<Worker<P>, WorkerBuildError> {
        let provider = self.provider.ok_or(WorkerBuildError::MissingProvider)?;
        if self.jobs.is_empty() {
            return Err(WorkerBuildError::NoJobsDefined);
        }

        let poll_interval = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            return Err(WorkerBuildError::ZeroInterval("poll_interval"));
        }
        let heartbeat_interval = self
            .heartbeat_interval
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        if heartbeat_interval.is_zero() {
            return Err(WorkerBuildError::ZeroInterval("heartbeat_interval"));
        }
        if self
            .retention_sweep
            .is_some_and(|sweep| sweep.interval().is_zero())
        {
            return Err(WorkerBuildError::ZeroInterval("retention_sweep.interval"));
        }

        let worker_id = self.worker_id.unwrap_or_else(|| {
            let mut random_bytes = [0u8; 9];
            rand::rng().fill_bytes(&mut random_bytes);
            format!("lease_queue_worker_{}", hex::encode(random_bytes))
        });

        let mut job_types: Vec<String> = self.jobs.keys().cloned().collect();
        job_types.sort();

        Ok(Worker {
            worker_id,
            poll_interval,
            heartbeat_interval,
            provider,
            job_types,
            jobs: self.jobs,
            shutdown_signal: self.shutdown_signal.unwrap_or_else(shutdown_signal),
            retention_sweep: self.retention_sweep,
        })
    }

    pub fn provider(mut self, provider: Arc<P>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn worker_id(mut self, value: &str) -> Self {
        self.worker_id = Some(value.to_string());
        self
    }

    /// How long to wait before polling again when no job was available.
    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = Some(value);
        self
    }

    /// How often the lease of a running job is renewed.
    pub fn heartbeat_interval(mut self, value: Duration) -> Self {
        self.heartbeat_interval = Some(value);
        self
    }

    /// Replaces the default OS signal based shutdown.
    pub fn shutdown_signal(mut self, value: ShutdownSignal) -> Self {
        self.shutdown_signal = Some(value);
        self
    }

    /// Deletes old terminal jobs periodically while the worker runs.
    pub fn retention_sweep(mut self, value: RetentionSweep) -> Self {
        self.retention_sweep = Some(value);
        self
    }

    /// Registers the handler for `job_type`.
    ///
    /// `Ok` values are serialized into the job result, `Err` values fail the
    /// job with their `Display` rendering as message.
    pub fn define_job<F, Fut, R, E>(mut self, job_type: &str, handler: F) -> Self
    where
        F: Fn(JobContext<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Serialize,
        E: Display,
    {
        let worker_fn = move |ctx: JobContext<P>| {
            let fut = handler(ctx);
            async move {
                match fut.await {
                    Ok(result) => serde_json::to_value(result).map_err(|e| {
                        JobFailure::new("RESULT_NOT_SERIALIZABLE", e.to_string())
                    }),
                    Err(e) => Err(JobFailure::new("JOB_FAILED", e.to_string())),
                }
            }
            .boxed()
        };

        self.jobs.insert(job_type.to_string(), Box::new(worker_fn));
        self
    }
}

/// Polls a provider and runs the registered handlers one job at a time.
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Worker<P> {
    worker_id: String,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    provider: Arc<P>,
    /// Types this worker asks the provider for
    job_types: Vec<String>,
    #[getset(skip)]
    jobs: HashMap<String, WorkerFn<P>>,
    shutdown_signal: ShutdownSignal,
    retention_sweep: Option<RetentionSweep>,
}

impl<P: QueueProvider + 'static> Worker<P> {
    pub fn options() -> WorkerOptions<P> {
        WorkerOptions::default()
    }

    /// Processes jobs until the shutdown signal resolves.
    ///
    /// A job that is already running is allowed to finish before returning.
    /// The retention sweep, when configured, runs alongside and stops with it.
    pub async fn run(&self) -> Result<(), WorkerRuntimeError> {
        info!(worker_id = %self.worker_id, job_types = ?self.job_types, "Worker started");

        let sweep = self.retention_sweep.map(|sweep| {
            spawn_retention_sweep(self.provider.clone(), sweep, self.shutdown_signal.clone())
        });
        let result = self.poll_until_shutdown().await;
        if let Some(sweep) = sweep {
            sweep.abort();
        }

        info!(worker_id = %self.worker_id, "Worker stopped");
        result
    }

    async fn poll_until_shutdown(&self) -> Result<(), WorkerRuntimeError> {
        loop {
            if self.shutdown_signal.clone().now_or_never().is_some() {
                break;
            }

            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(WorkerRuntimeError::Queue(e)) if e.is_retryable() => {
                    warn!(error = %e, "Queue temporarily unavailable");
                }
                Err(e) => {
                    error!(error = %e, "Worker stopped on error");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = self.shutdown_signal.clone() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        Ok(())
    }

    /// Processes every job currently available, then returns how many ran.
    pub async fn run_once(&self) -> Result<usize, WorkerRuntimeError> {
        let mut processed = 0;
        while self.process_next().await? {
            processed += 1;
        }
        Ok(processed)
    }

    async fn process_next(&self) -> Result<bool, WorkerRuntimeError> {
        let job_types: Vec<&str> = self.job_types.iter().map(String::as_str).collect();
        let Some(job) = self
            .provider
            .reserve(&self.worker_id, Some(job_types.as_slice()))
            .await?
        else {
            return Ok(false);
        };

        let span = tracing::info_span!("run_job", job_id = %job.id(), job_type = %job.job_type());
        self.run_job(job).instrument(span).await?;
        Ok(true)
    }

    async fn run_job(&self, job: Job) -> Result<(), WorkerRuntimeError> {
        let job_id = job.id().clone();
        let Some(handler) = self.jobs.get(job.job_type()) else {
            let failure = JobFailure::new(
                "NO_HANDLER",
                format!("No handler registered for '{}'", job.job_type()),
            );
            return self.release(&job_id, Err(failure)).await;
        };

        let lease_lost = CancellationToken::new();
        let ctx = JobContext {
            job: Arc::new(job),
            provider: self.provider.clone(),
            worker_id: Arc::from(self.worker_id.as_str()),
            lease_lost: lease_lost.clone(),
        };

        let start = Instant::now();
        let mut task = tokio::spawn(handler(ctx));
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.tick().await;

        let outcome = loop {
            tokio::select! {
                res = &mut task => break Some(res),
                _ = lease_lost.cancelled() => break None,
                _ = heartbeat.tick() => {
                    match self.provider.heartbeat(&job_id, &self.worker_id, None).await {
                        Ok(_) => debug!("Lease renewed"),
                        Err(e) if is_lease_lost(&e) => {
                            lease_lost.cancel();
                            break None;
                        }
                        Err(e) => warn!(error = %e, "Heartbeat failed"),
                    }
                }
            }
        };

        let Some(joined) = outcome else {
            task.abort();
            warn!("Lease lost, job aborted");
            return Ok(());
        };

        let result = joined.unwrap_or_else(|e| Err(JobFailure::new("JOB_PANICKED", e.to_string())));
        debug!(duration = ?start.elapsed(), success = result.is_ok(), "Handler finished");
        self.release(&job_id, result).await
    }

    async fn release(
        &self,
        job_id: &JobId,
        result: Result<Value, JobFailure>,
    ) -> Result<(), WorkerRuntimeError> {
        let released = match result {
            Ok(value) => self
                .provider
                .complete(job_id, &self.worker_id, value)
                .await
                .map(|_| info!("Job completed")),
            Err(failure) => self
                .provider
                .fail(job_id, &self.worker_id, failure)
                .await
                .map(|job| {
                    let retry_after = job.error().as_ref().and_then(|e| e.retry_after);
                    warn!(?retry_after, attempt = job.attempt(), "Job failed");
                }),
        };

        match released {
            Ok(()) => Ok(()),
            Err(e) if is_lease_lost(&e) => {
                warn!(error = %e, "Lease lost before the job could be released");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
