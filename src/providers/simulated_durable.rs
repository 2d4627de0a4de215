use std::sync::Arc;
use std::time::Duration;

use lease_queue_clock::{Clock, SystemClock};
use lease_queue_job::{Job, JobFailure, JobId, JobTransition};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::QueueConfig;
use crate::enqueue_request::EnqueueRequest;
use crate::errors::{QueueError, Result};
use crate::provider::QueueProvider;
use crate::queue_core::QueueCore;
use crate::stats::QueueStats;
use crate::store::SnapshotStore;

const DEFAULT_LATENCY: Duration = Duration::from_millis(10);
const DEFAULT_READ_LATENCY: Duration = Duration::from_millis(5);
const DEFAULT_FAILURE_RATE: f64 = 0.1;

/// Latency and failure injection of [`SimulatedDurableQueueProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOptions {
    /// Delay added to every write
    pub latency: Duration,
    /// Delay added to every read
    pub read_latency: Duration,
    /// Whether `enqueue` randomly fails with `SERVICE_UNAVAILABLE`
    pub simulate_failures: bool,
    /// Probability of an injected failure, between 0 and 1
    pub failure_rate: f64,
    /// Seed of the failure RNG, random when `None`
    pub seed: Option<u64>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            latency: DEFAULT_LATENCY,
            read_latency: DEFAULT_READ_LATENCY,
            simulate_failures: false,
            failure_rate: DEFAULT_FAILURE_RATE,
            seed: None,
        }
    }
}

impl SimulationOptions {
    /// No latency and no failures.
    pub fn instant() -> Self {
        Self {
            latency: Duration::ZERO,
            read_latency: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_read_latency(mut self, read_latency: Duration) -> Self {
        self.read_latency = read_latency;
        self
    }

    /// Enables failure injection with the given probability.
    pub fn with_failures(mut self, failure_rate: f64) -> Self {
        self.simulate_failures = true;
        self.failure_rate = failure_rate;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

struct SimulationState {
    options: SimulationOptions,
    rng: StdRng,
}

impl SimulationState {
    fn new(options: SimulationOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { options, rng }
    }

    fn should_fail(&mut self) -> bool {
        self.options.simulate_failures
            && self.rng.random::<f64>() < self.options.failure_rate.clamp(0.0, 1.0)
    }
}

/// Queue that keeps jobs as serialized documents and behaves like a remote
/// store: every call pays a configurable latency and `enqueue` can be made to
/// fail at random.
pub struct SimulatedDurableQueueProvider {
    core: Mutex<QueueCore<SnapshotStore>>,
    simulation: Mutex<SimulationState>,
}

impl SimulatedDurableQueueProvider {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let simulation = SimulationState::new(config.simulation().clone());
        Self {
            core: Mutex::new(QueueCore::new(SnapshotStore::default(), config, clock)),
            simulation: Mutex::new(simulation),
        }
    }

    /// Replaces the simulation settings. A new seed restarts the failure sequence.
    pub async fn set_simulation(&self, options: SimulationOptions) {
        let mut simulation = self.simulation.lock().await;
        if options.seed.is_some() && options.seed != simulation.options.seed {
            *simulation = SimulationState::new(options);
        } else {
            simulation.options = options;
        }
    }

    pub async fn simulation(&self) -> SimulationOptions {
        self.simulation.lock().await.options.clone()
    }

    async fn write_delay(&self) {
        let latency = self.simulation.lock().await.options.latency;
        pause(latency).await;
    }

    async fn read_delay(&self) {
        let latency = self.simulation.lock().await.options.read_latency;
        pause(latency).await;
    }

    async fn maybe_fail(&self) -> Result<()> {
        if self.simulation.lock().await.should_fail() {
            warn!("Injected enqueue failure");
            return Err(QueueError::ServiceUnavailable(
                "Simulated network failure".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SimulatedDurableQueueProvider {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

async fn pause(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

impl QueueProvider for SimulatedDurableQueueProvider {
    #[tracing::instrument(
        "enqueue",
        skip_all,
        fields(queue.provider = "simulated-durable", job_type = %request.job_type())
    )]
    async fn enqueue(&self, request: EnqueueRequest) -> Result<Job> {
        self.write_delay().await;
        self.maybe_fail().await?;
        self.core.lock().await.enqueue(request)
    }

    #[tracing::instrument(
        "reserve",
        skip_all,
        fields(queue.provider = "simulated-durable", worker_id = %worker_id)
    )]
    async fn reserve(&self, worker_id: &str, job_types: Option<&[&str]>) -> Result<Option<Job>> {
        self.write_delay().await;
        self.core.lock().await.reserve(worker_id, job_types)
    }

    #[tracing::instrument(
        "heartbeat",
        skip_all,
        fields(queue.provider = "simulated-durable", job_id = %job_id, worker_id = %worker_id)
    )]
    async fn heartbeat(
        &self,
        job_id: &JobId,
        worker_id: &str,
        progress: Option<u8>,
    ) -> Result<Job> {
        self.write_delay().await;
        self.core.lock().await.heartbeat(job_id, worker_id, progress)
    }

    #[tracing::instrument(
        "complete",
        skip_all,
        fields(queue.provider = "simulated-durable", job_id = %job_id, worker_id = %worker_id)
    )]
    async fn complete(&self, job_id: &JobId, worker_id: &str, result: Value) -> Result<Job> {
        self.write_delay().await;
        self.core.lock().await.complete(job_id, worker_id, result)
    }

    #[tracing::instrument(
        "fail",
        skip_all,
        fields(queue.provider = "simulated-durable", job_id = %job_id, worker_id = %worker_id)
    )]
    async fn fail(&self, job_id: &JobId, worker_id: &str, failure: JobFailure) -> Result<Job> {
        self.write_delay().await;
        self.core.lock().await.fail(job_id, worker_id, failure)
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        self.read_delay().await;
        self.core.lock().await.get_job(job_id)
    }

    async fn get_job_history(&self, job_id: &JobId) -> Result<Vec<JobTransition>> {
        self.read_delay().await;
        self.core.lock().await.get_job_history(job_id)
    }

    async fn get_stats(&self) -> Result<QueueStats> {
        self.read_delay().await;
        self.core.lock().await.get_stats()
    }

    #[tracing::instrument(
        "clean_old_jobs",
        skip(self),
        fields(queue.provider = "simulated-durable")
    )]
    async fn clean_old_jobs(&self, max_age: Duration) -> Result<usize> {
        self.write_delay().await;
        self.core.lock().await.clean_old_jobs(max_age)
    }

    async fn get_request_job_count(&self, request_id: &str) -> Result<usize> {
        self.read_delay().await;
        Ok(self.core.lock().await.get_request_job_count(request_id))
    }

    async fn get_request_jobs(&self, request_id: &str) -> Result<Vec<Job>> {
        self.read_delay().await;
        self.core.lock().await.get_request_jobs(request_id)
    }

    async fn reset(&self) -> Result<()> {
        self.core.lock().await.reset();
        Ok(())
    }
}
