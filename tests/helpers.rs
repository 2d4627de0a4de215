#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use lease_queue::{
    EnqueueRequest, MockClock, ProviderKind, QueueBackend, QueueConfig, QueueConfigBuilder,
    RetryPolicy, SimulationOptions,
};
use tokio::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer().with_test_writer();
        let filter_layer = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("debug"))
            .unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn mock_clock() -> Arc<MockClock> {
    Arc::new(MockClock::new(start_time()))
}

/// Builds a backend of `kind` driven by a mock clock. Simulated latency is disabled.
pub fn backend_with(
    kind: ProviderKind,
    config: QueueConfigBuilder,
) -> (Arc<QueueBackend>, Arc<MockClock>) {
    let clock = mock_clock();
    let config = config
        .provider(kind)
        .simulation(SimulationOptions::instant())
        .build();
    let backend = QueueBackend::with_clock(config, clock.clone());
    (Arc::new(backend), clock)
}

pub fn backend(kind: ProviderKind) -> (Arc<QueueBackend>, Arc<MockClock>) {
    backend_with(kind, QueueConfig::builder())
}

pub fn request(job_type: &str) -> EnqueueRequest {
    EnqueueRequest::new(job_type, serde_json::json!({ "source": "test" }))
}

pub fn keyed_request(job_type: &str, key: &str) -> EnqueueRequest {
    EnqueueRequest::builder()
        .job_type(job_type)
        .idempotency_key(key)
        .build()
}

pub fn retrying_request(job_type: &str, key: &str, policy: RetryPolicy) -> EnqueueRequest {
    EnqueueRequest::builder()
        .job_type(job_type)
        .idempotency_key(key)
        .retry_policy(policy)
        .build()
}

pub fn request_in(job_type: &str, request_id: &str) -> EnqueueRequest {
    EnqueueRequest::builder()
        .job_type(job_type)
        .request_id(request_id)
        .build()
}

pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
