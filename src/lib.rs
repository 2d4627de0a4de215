//! Provider-agnostic job queue.
//!
//! Jobs are submitted through a [`QueueProvider`], leased to one worker at a
//! time, and resolved to a result or a failure. Submissions can be made
//! idempotent with a key; failures under a key arm a backoff window before
//! the key may be resubmitted, and raw submission volume is rate limited.
//!
//! ```
//! use lease_queue::{EnqueueRequest, InMemoryQueueProvider, QueueProvider};
//!
//! # async fn example() -> lease_queue::Result<()> {
//! let queue = InMemoryQueueProvider::default();
//! let job = queue
//!     .enqueue(EnqueueRequest::new("preview", serde_json::json!({ "url": "https://example.com" })))
//!     .await?;
//!
//! let leased = queue.reserve("worker-1", Some(&["preview"])).await?.expect("job available");
//! queue.heartbeat(leased.id(), "worker-1", Some(50)).await?;
//! queue.complete(leased.id(), "worker-1", serde_json::json!({ "ok": true })).await?;
//! # assert_eq!(leased.id(), job.id());
//! # Ok(())
//! # }
//! ```

mod backoff;
pub mod config;
mod enqueue_request;
pub mod errors;
mod lease;
pub mod provider;
pub mod providers;
mod queue_core;
mod rate_limiter;
pub mod retention;
pub mod runner;
mod stats;
mod store;
mod utils;

pub use backoff::calculate_backoff;
pub use config::{ConfigError, ProviderKind, QueueConfig, QueueConfigBuilder, RateLimit};
pub use enqueue_request::{EnqueueRequest, EnqueueRequestBuilder};
pub use errors::{ErrorCode, QueueError, Result};
pub use lease_queue_clock::{mock::MockClock, Clock, SystemClock};
pub use lease_queue_job::{
    BackoffStrategy, Job, JobFailure, JobId, JobPriority, JobStatus, JobTransition, RetryPolicy,
};
pub use lease_queue_shutdown_signal::{
    manual_shutdown_signal, shutdown_signal, shutdown_signal_or_manual, ShutdownHandle,
    ShutdownSignal,
};
pub use provider::{create_queue_provider, QueueBackend, QueueProvider};
pub use providers::in_memory::InMemoryQueueProvider;
pub use providers::simulated_durable::{SimulatedDurableQueueProvider, SimulationOptions};
pub use retention::{spawn_retention_sweep, sweep_until_shutdown, RetentionSweep};
pub use runner::{JobContext, Worker, WorkerBuildError, WorkerOptions, WorkerRuntimeError};
pub use stats::QueueStats;
