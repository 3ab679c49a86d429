//! Job store contract and an in-memory implementation.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use super::model::{Job, JobId, JobStatus, JobType, NewJob};
use crate::{Error, Result};

/// Durable job records with atomic conditional updates.
///
/// Every status write is conditional on the current status so that concurrent workers
/// (and operators editing jobs by hand) never overwrite each other. A `false` return
/// means the precondition no longer held and nothing was written.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: NewJob) -> Result<Job>;

    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Oldest job of this type still in `pending`, if any.
    async fn oldest_pending(&self, job_type: JobType) -> Result<Option<Job>>;

    /// `SET status = processing WHERE id = ? AND status = pending`.
    async fn try_claim(&self, id: JobId) -> Result<bool>;

    /// `processing → completed`, clearing `error_message`.
    async fn complete(&self, id: JobId) -> Result<bool>;

    /// `processing → failed`, recording `message`.
    async fn fail(&self, id: JobId, message: &str) -> Result<bool>;

    /// `processing → pending` after a rate-limit pause; increments `retry_count`.
    async fn defer(&self, id: JobId, reason: &str) -> Result<bool>;

    async fn count_by_status(&self, job_type: JobType, status: JobStatus) -> Result<usize>;
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    job: Job,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    jobs: HashMap<JobId, Entry>,
}

/// Process-local job store.
///
/// All transitions happen under one mutex, which gives the same guarantees as a
/// single-row conditional `UPDATE` in a database.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::store("job store mutex poisoned"))
    }

    fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        update: impl FnOnce(&mut Job),
    ) -> Result<bool> {
        debug_assert!(from.can_transition_to(to));
        let mut st = self.lock()?;
        let Some(entry) = st.jobs.get_mut(&id) else {
            return Err(Error::store(format!("job {} not found", id)));
        };
        if entry.job.status != from {
            return Ok(false);
        }
        entry.job.status = to;
        entry.job.updated_at = Utc::now();
        update(&mut entry.job);
        Ok(true)
    }

    /// Operator override: force a job into `failed` regardless of its current state.
    ///
    /// A worker still holding the job will find its terminal write rejected and discard
    /// the provider result.
    pub fn cancel(&self, id: JobId, message: &str) -> Result<bool> {
        let mut st = self.lock()?;
        match st.jobs.get_mut(&id) {
            Some(entry) if !entry.job.status.is_terminal() => {
                entry.job.status = JobStatus::Failed;
                entry.job.error_message = message.to_string();
                entry.job.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(Error::store(format!("job {} not found", id))),
        }
    }

    pub fn snapshot(&self) -> Result<Vec<Job>> {
        let st = self.lock()?;
        let mut entries: Vec<&Entry> = st.jobs.values().collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries.into_iter().map(|e| e.job.clone()).collect())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: NewJob) -> Result<Job> {
        let mut st = self.lock()?;
        let job = Job::from_new(job, Utc::now());
        let seq = st.next_seq;
        st.next_seq += 1;
        st.jobs.insert(
            job.id,
            Entry {
                seq,
                job: job.clone(),
            },
        );
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.lock()?.jobs.get(&id).map(|e| e.job.clone()))
    }

    async fn oldest_pending(&self, job_type: JobType) -> Result<Option<Job>> {
        let st = self.lock()?;
        Ok(st
            .jobs
            .values()
            .filter(|e| e.job.job_type == job_type && e.job.status == JobStatus::Pending)
            .min_by_key(|e| (e.job.created_at, e.seq))
            .map(|e| e.job.clone()))
    }

    async fn try_claim(&self, id: JobId) -> Result<bool> {
        self.transition(id, JobStatus::Pending, JobStatus::Processing, |_| {})
    }

    async fn complete(&self, id: JobId) -> Result<bool> {
        self.transition(id, JobStatus::Processing, JobStatus::Completed, |job| {
            job.error_message.clear();
        })
    }

    async fn fail(&self, id: JobId, message: &str) -> Result<bool> {
        self.transition(id, JobStatus::Processing, JobStatus::Failed, |job| {
            job.error_message = message.to_string();
        })
    }

    async fn defer(&self, id: JobId, reason: &str) -> Result<bool> {
        self.transition(id, JobStatus::Processing, JobStatus::Pending, |job| {
            job.error_message = reason.to_string();
            job.retry_count = job.retry_count.saturating_add(1);
        })
    }

    async fn count_by_status(&self, job_type: JobType, status: JobStatus) -> Result<usize> {
        let st = self.lock()?;
        Ok(st
            .jobs
            .values()
            .filter(|e| e.job.job_type == job_type && e.job.status == status)
            .count())
    }
}
