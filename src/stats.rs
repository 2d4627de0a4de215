use std::time::Duration;

use chrono::{DateTime, Utc};
use lease_queue_job::{Job, JobStatus};
use serde::{Deserialize, Serialize};

/// Snapshot of the jobs currently held by a provider.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    /// Mean time between reservation and resolution of terminal jobs
    pub avg_processing_time: Option<Duration>,
    /// Share of terminal jobs that completed, between 0 and 1
    pub success_rate: Option<f64>,
}

impl QueueStats {
    pub(crate) fn tally<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut stats = QueueStats::default();
        let mut processing_total = Duration::ZERO;
        let mut processing_samples = 0u32;

        for job in jobs {
            stats.total += 1;
            match job.status() {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
            if let Some(elapsed) = job.processing_time() {
                processing_total = processing_total.saturating_add(elapsed);
                processing_samples += 1;
            }
        }

        if processing_samples > 0 {
            stats.avg_processing_time = Some(processing_total / processing_samples);
        }
        let finished = stats.completed + stats.failed;
        if finished > 0 {
            stats.success_rate = Some(stats.completed as f64 / finished as f64);
        }
        stats
    }
}

/// Whether retention may delete `job`: terminal and untouched since before `threshold`.
pub(crate) fn is_expired(job: &Job, threshold: DateTime<Utc>) -> bool {
    job.is_terminal() && *job.updated_at() < threshold
}
