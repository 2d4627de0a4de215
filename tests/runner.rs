use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lease_queue::{
    manual_shutdown_signal, ErrorCode, InMemoryQueueProvider, JobContext, JobStatus,
    QueueConfig, QueueProvider, RetentionSweep, RetryPolicy, Worker, WorkerBuildError,
};
use serde::{Deserialize, Serialize};

use crate::helpers::{enable_logs, mock_clock, request, retrying_request};

mod helpers;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Echo {
    source: String,
}

fn provider() -> Arc<InMemoryQueueProvider> {
    Arc::new(InMemoryQueueProvider::new(
        QueueConfig::builder().disable_rate_limit().build(),
    ))
}

#[tokio::test]
async fn run_once_processes_available_jobs() {
    enable_logs().await;
    let queue = provider();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(queue.enqueue(request("echo")).await.unwrap().id().clone());
    }

    let worker = Worker::options()
        .provider(queue.clone())
        .worker_id("test-worker")
        .define_job("echo", {
            let calls = calls.clone();
            move |ctx: JobContext<InMemoryQueueProvider>| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ctx.progress(40).await?;
                    serde_json::from_value::<Echo>(ctx.payload().clone())
                        .map_err(lease_queue::QueueError::from)
                }
            }
        })
        .init()
        .expect("Failed to create worker");

    assert_eq!(worker.run_once().await.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(worker.run_once().await.unwrap(), 0);

    for id in ids {
        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status(), &JobStatus::Completed);
        assert_eq!(job.result(), &Some(serde_json::json!({ "source": "test" })));
    }
}

#[tokio::test]
async fn handler_error_fails_the_job() {
    let queue = provider();
    let job = queue
        .enqueue(retrying_request(
            "explode",
            "explode-1",
            RetryPolicy::fixed(3, Duration::from_secs(1)),
        ))
        .await
        .unwrap();

    let worker = Worker::options()
        .provider(queue.clone())
        .define_job("explode", |_ctx: JobContext<InMemoryQueueProvider>| async {
            Err::<(), _>("boom")
        })
        .init()
        .unwrap();

    assert_eq!(worker.run_once().await.unwrap(), 1);

    let job = queue.get_job(job.id()).await.unwrap().unwrap();
    assert_eq!(job.status(), &JobStatus::Failed);
    let error = job.error().as_ref().unwrap();
    assert_eq!(error.code, "JOB_FAILED");
    assert_eq!(error.message, "boom");
    assert_eq!(error.retry_after, Some(Duration::from_secs(1)));
}

#[tokio::test]
async fn unknown_job_types_are_left_alone() {
    let queue = provider();
    let job = queue.enqueue(request("other")).await.unwrap();

    let worker = Worker::options()
        .provider(queue.clone())
        .define_job("echo", |_ctx: JobContext<InMemoryQueueProvider>| async {
            Ok::<_, String>(())
        })
        .init()
        .unwrap();

    assert_eq!(worker.run_once().await.unwrap(), 0);
    let job = queue.get_job(job.id()).await.unwrap().unwrap();
    assert_eq!(job.status(), &JobStatus::Queued);
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let queue = provider();
    let (handle, signal) = manual_shutdown_signal();

    let worker = Worker::options()
        .provider(queue.clone())
        .poll_interval(Duration::from_millis(10))
        .shutdown_signal(signal)
        .define_job("echo", |_ctx: JobContext<InMemoryQueueProvider>| async {
            Ok::<_, String>("done")
        })
        .init()
        .unwrap();

    let running = tokio::spawn(async move { worker.run().await });
    let job = queue.enqueue(request("echo")).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = queue.get_job(job.id()).await.unwrap().unwrap();
            if job.status() == &JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Job should complete while the worker runs");

    handle.trigger();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("Worker should stop after shutdown")
        .expect("Task panicked")
        .expect("Worker should stop cleanly");
}

#[tokio::test]
async fn run_sweeps_old_jobs() {
    enable_logs().await;
    let clock = mock_clock();
    let queue = Arc::new(InMemoryQueueProvider::with_clock(
        QueueConfig::builder().disable_rate_limit().build(),
        clock.clone(),
    ));
    let (handle, signal) = manual_shutdown_signal();

    let worker = Worker::options()
        .provider(queue.clone())
        .poll_interval(Duration::from_millis(10))
        .shutdown_signal(signal)
        .retention_sweep(RetentionSweep::new(
            Duration::from_millis(20),
            Duration::from_secs(3600),
        ))
        .define_job("echo", |_ctx: JobContext<InMemoryQueueProvider>| async {
            Ok::<_, String>("done")
        })
        .init()
        .unwrap();
    let job = queue.enqueue(request("echo")).await.unwrap();
    let running = tokio::spawn(async move { worker.run().await });

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = queue.get_job(job.id()).await.unwrap().unwrap();
            if job.status() == &JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Job should complete while the worker runs");

    clock.advance(Duration::from_secs(7200));
    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.get_job(job.id()).await.unwrap().is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Completed job should be swept");

    handle.trigger();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("Worker should stop after shutdown")
        .expect("Task panicked")
        .expect("Worker should stop cleanly");
}

#[tokio::test]
async fn lost_lease_is_detected_and_job_is_retried() {
    let clock = mock_clock();
    let queue = Arc::new(InMemoryQueueProvider::with_clock(
        QueueConfig::builder()
            .disable_rate_limit()
            .lease_duration(Duration::from_secs(30))
            .build(),
        clock.clone(),
    ));
    let job = queue.enqueue(request("slow")).await.unwrap();

    let stalled = Arc::new(AtomicBool::new(false));
    let lease_lost_seen = Arc::new(AtomicBool::new(false));

    let worker = Worker::options()
        .provider(queue.clone())
        .define_job("slow", {
            let clock = clock.clone();
            let stalled = stalled.clone();
            let lease_lost_seen = lease_lost_seen.clone();
            move |ctx: JobContext<InMemoryQueueProvider>| {
                let clock = clock.clone();
                let stalled = stalled.clone();
                let lease_lost_seen = lease_lost_seen.clone();
                async move {
                    if !stalled.swap(true, Ordering::SeqCst) {
                        clock.advance(Duration::from_secs(31));
                        let err = ctx.progress(50).await.unwrap_err();
                        if err.code() == ErrorCode::Forbidden && ctx.lease_lost().is_cancelled() {
                            lease_lost_seen.store(true, Ordering::SeqCst);
                        }
                        return Err(err.to_string());
                    }
                    Ok(ctx.job().attempt().to_owned())
                }
            }
        })
        .init()
        .unwrap();

    assert_eq!(worker.run_once().await.unwrap(), 2);
    assert!(lease_lost_seen.load(Ordering::SeqCst));

    let job = queue.get_job(job.id()).await.unwrap().unwrap();
    assert_eq!(job.status(), &JobStatus::Completed);
    assert_eq!(job.error(), &None);
}

#[tokio::test]
async fn worker_build_errors() {
    let missing_provider = Worker::<InMemoryQueueProvider>::options()
        .define_job("echo", |_ctx| async { Ok::<_, String>(()) })
        .init();
    assert_eq!(missing_provider.err(), Some(WorkerBuildError::MissingProvider));

    let no_jobs = Worker::options().provider(provider()).init();
    assert_eq!(no_jobs.err(), Some(WorkerBuildError::NoJobsDefined));

    let zero_poll = Worker::options()
        .provider(provider())
        .poll_interval(Duration::ZERO)
        .define_job("echo", |_ctx| async { Ok::<_, String>(()) })
        .init();
    assert_eq!(
        zero_poll.err(),
        Some(WorkerBuildError::ZeroInterval("poll_interval"))
    );

    let zero_sweep = Worker::options()
        .provider(provider())
        .retention_sweep(RetentionSweep::new(Duration::ZERO, Duration::from_secs(60)))
        .define_job("echo", |_ctx| async { Ok::<_, String>(()) })
        .init();
    assert_eq!(
        zero_sweep.err(),
        Some(WorkerBuildError::ZeroInterval("retention_sweep.interval"))
    );
}

#[tokio::test]
async fn default_worker_id_is_random() {
    let first = Worker::options()
        .provider(provider())
        .define_job("echo", |_ctx| async { Ok::<_, String>(()) })
        .init()
        .unwrap();
    let second = Worker::options()
        .provider(provider())
        .define_job("echo", |_ctx| async { Ok::<_, String>(()) })
        .init()
        .unwrap();

    assert!(first.worker_id().starts_with("lease_queue_worker_"));
    assert_ne!(first.worker_id(), second.worker_id());
    assert_eq!(first.job_types(), &vec!["echo".to_string()]);
}
