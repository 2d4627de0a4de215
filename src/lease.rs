use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lease_queue_job::{Job, JobId};

use crate::errors::{QueueError, Result};
use crate::utils::add_duration;

/// Position of a queued job. Ordering puts the oldest job first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyEntry {
    sequence: u64,
    job_id: JobId,
    job_type: String,
}

impl ReadyEntry {
    fn for_job(job: &Job) -> Self {
        Self {
            sequence: *job.sequence(),
            job_id: job.id().clone(),
            job_type: job.job_type().clone(),
        }
    }
}

/// Tracks which jobs can be reserved and which leases are outstanding.
#[derive(Debug, Default)]
pub(crate) struct LeaseManager {
    lease_duration: Option<Duration>,
    ready: BTreeSet<ReadyEntry>,
    leases: HashMap<JobId, Option<DateTime<Utc>>>,
}

impl LeaseManager {
    pub(crate) fn new(lease_duration: Option<Duration>) -> Self {
        Self {
            lease_duration,
            ..Default::default()
        }
    }

    /// Deadline of a lease granted or extended at `now`.
    pub(crate) fn deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lease_duration.map(|d| add_duration(now, d))
    }

    pub(crate) fn push_ready(&mut self, job: &Job) {
        self.ready.insert(ReadyEntry::for_job(job));
    }

    pub(crate) fn remove_ready(&mut self, job: &Job) -> bool {
        self.ready.remove(&ReadyEntry::for_job(job))
    }

    /// Oldest queued job matching `job_types`. Priority is only a tag and does not reorder.
    ///
    /// `None` or an empty slice accepts any type.
    pub(crate) fn select(&self, job_types: Option<&[&str]>) -> Option<JobId> {
        let accepts = |entry: &&ReadyEntry| match job_types {
            Some(types) if !types.is_empty() => types.contains(&entry.job_type.as_str()),
            _ => true,
        };
        self.ready.iter().find(accepts).map(|e| e.job_id.clone())
    }

    pub(crate) fn track(&mut self, job: &Job) {
        self.leases
            .insert(job.id().clone(), *job.lease_expires_at());
    }

    pub(crate) fn release(&mut self, job_id: &JobId) {
        self.leases.remove(job_id);
    }

    /// Leases whose deadline is at or before `now`.
    pub(crate) fn expired(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let mut expired: Vec<_> = self
            .leases
            .iter()
            .filter(|(_, deadline)| deadline.is_some_and(|d| d <= now))
            .map(|(job_id, _)| job_id.clone())
            .collect();
        expired.sort();
        expired
    }

    /// Maps a lease violation on `job` to `FORBIDDEN`.
    pub(crate) fn authorize(&self, job: &Job, worker_id: &str) -> Result<()> {
        job.ensure_lease_holder(worker_id)
            .map_err(|e| QueueError::from_transition(job.id(), e))
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn clear(&mut self) {
        self.ready.clear();
        self.leases.clear();
    }
}
