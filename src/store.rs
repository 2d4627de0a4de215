use std::collections::HashMap;

use lease_queue_job::{Job, JobId};

use crate::errors::Result;

/// Storage backing a queue core.
///
/// Stores hand out owned copies so a serialized representation can sit behind
/// the same interface as plain records.
pub trait JobStore: Send {
    fn get(&self, job_id: &JobId) -> Result<Option<Job>>;

    fn put(&mut self, job: Job) -> Result<()>;

    fn remove(&mut self, job_id: &JobId) -> Result<Option<Job>>;

    fn jobs(&self) -> Result<Vec<Job>>;

    fn clear(&mut self);
}

/// Jobs held as typed records.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: HashMap<JobId, Job>,
}

impl JobStore for MemoryStore {
    fn get(&self, job_id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.get(job_id).cloned())
    }

    fn put(&mut self, job: Job) -> Result<()> {
        self.jobs.insert(job.id().clone(), job);
        Ok(())
    }

    fn remove(&mut self, job_id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.remove(job_id))
    }

    fn jobs(&self) -> Result<Vec<Job>> {
        Ok(self.jobs.values().cloned().collect())
    }

    fn clear(&mut self) {
        self.jobs.clear();
    }
}

/// Jobs held as serialized JSON documents, the way an external key-value store keeps them.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    documents: HashMap<JobId, String>,
}

impl JobStore for SnapshotStore {
    fn get(&self, job_id: &JobId) -> Result<Option<Job>> {
        self.documents
            .get(job_id)
            .map(|document| serde_json::from_str(document))
            .transpose()
            .map_err(Into::into)
    }

    fn put(&mut self, job: Job) -> Result<()> {
        let document = serde_json::to_string(&job)?;
        self.documents.insert(job.id().clone(), document);
        Ok(())
    }

    fn remove(&mut self, job_id: &JobId) -> Result<Option<Job>> {
        self.documents
            .remove(job_id)
            .map(|document| serde_json::from_str(&document))
            .transpose()
            .map_err(Into::into)
    }

    fn jobs(&self) -> Result<Vec<Job>> {
        self.documents
            .values()
            .map(|document| serde_json::from_str(document).map_err(Into::into))
            .collect()
    }

    fn clear(&mut self) {
        self.documents.clear();
    }
}
