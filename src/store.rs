//! In-process job store: `JobId → Job`.
//!
//! One writer per job (its orchestrator task), many readers (status pollers).
//! Mutations run against a private copy of the record and are committed in a
//! single assignment only when the mutator returns `Ok`, so a reader can never
//! observe a half-applied update, and a rejected update leaves no trace.
//!
//! The store is an explicit instance, constructed once and shared via `Arc`;
//! nothing in the crate reaches it through a global.

use crate::error::ScribeError;
use crate::job::{Job, JobId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the snapshot broadcast; slow subscribers lag, writers never block.
const EVENT_CAPACITY: usize = 1024;

pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    events: broadcast::Sender<Job>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Insert a freshly submitted job. Fails if the id is already present.
    pub fn create(&self, job: Job) -> Result<(), ScribeError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job.id) {
            return Err(ScribeError::Internal(format!("duplicate job id {}", job.id)));
        }
        jobs.insert(job.id, job.clone());
        drop(jobs);
        self.publish(job);
        Ok(())
    }

    /// Consistent snapshot of one job.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Apply `mutator` to job `id` atomically and return the committed snapshot.
    ///
    /// The mutator sees a copy; on `Err` nothing is written.
    pub fn update<F>(&self, id: JobId, mutator: F) -> Result<Job, ScribeError>
    where
        F: FnOnce(&mut Job) -> Result<(), ScribeError>,
    {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let current = jobs
            .get(&id)
            .ok_or_else(|| ScribeError::not_found(format!("job {}", id)))?;
        let mut next = current.clone();
        mutator(&mut next)?;
        jobs.insert(id, next.clone());
        drop(jobs);
        trace!(job_id = %id, status = %next.status, progress = next.progress, "job updated");
        self.publish(next.clone());
        Ok(next)
    }

    /// Find the job whose completed output carries `filename`.
    pub fn find_by_output(&self, filename: &str) -> Option<Job> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|j| j.output_filename.as_deref() == Some(filename))
            .cloned()
    }

    /// Remove jobs that reached a terminal state before `cutoff`; returns what was evicted.
    pub fn evict_terminal_before(&self, cutoff: DateTime<Utc>) -> Vec<Job> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let stale: Vec<JobId> = jobs
            .values()
            .filter(|j| j.is_terminal() && j.updated_at < cutoff)
            .map(|j| j.id)
            .collect();
        stale.iter().filter_map(|id| jobs.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every committed snapshot, across all jobs, from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.events.subscribe()
    }

    fn publish(&self, job: Job) {
        // No subscribers is the normal case for pure polling.
        let _ = self.events.send(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn new_job() -> Job {
        Job::new(JobId::new(), PathBuf::from("/tmp/in.pdf"), "in.pdf")
    }

    #[test]
    fn create_and_get() {
        let store = JobStore::new();
        let job = new_job();
        let id = job.id;
        store.create(job.clone()).unwrap();
        assert_eq!(store.get(id), Some(job));
        assert!(store.create(store.get(id).unwrap()).is_err());
    }

    #[test]
    fn get_unknown_is_none() {
        let store = JobStore::new();
        assert!(store.get(JobId::new()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn rejected_mutation_leaves_record_untouched() {
        let store = JobStore::new();
        let job = new_job();
        let id = job.id;
        store.create(job).unwrap();
        store
            .update(id, |j| j.advance_to(JobStatus::RunningOcr))
            .unwrap();
        let before = store.get(id).unwrap();

        let err = store
            .update(id, |j| {
                j.set_total(5)?;
                j.advance_to(JobStatus::Queued)
            })
            .unwrap_err();
        assert!(matches!(err, ScribeError::InvalidTransition(_)));
        assert_eq!(store.get(id).unwrap(), before, "total must not leak");
    }

    #[test]
    fn update_unknown_is_not_found() {
        let store = JobStore::new();
        let err = store.update(JobId::new(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, ScribeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn subscribers_see_every_commit() {
        let store = JobStore::new();
        let mut rx = store.subscribe();
        let job = new_job();
        let id = job.id;
        store.create(job).unwrap();
        store
            .update(id, |j| j.advance_to(JobStatus::RenderingPages))
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().status, JobStatus::Queued);
        assert_eq!(rx.recv().await.unwrap().status, JobStatus::RenderingPages);
    }

    #[test]
    fn concurrent_readers_see_consistent_snapshots() {
        let store = Arc::new(JobStore::new());
        let job = new_job();
        let id = job.id;
        store.create(job).unwrap();
        store.update(id, |j| j.set_total(500)).unwrap();

        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..2_000 {
                    let snap = store.get(id).unwrap();
                    assert!(snap.progress <= snap.total);
                    assert!(snap.progress >= last, "progress went backwards");
                    last = snap.progress;
                }
            })
        };
        for _ in 0..500 {
            store.update(id, |j| j.record_page_done()).unwrap();
        }
        reader.join().unwrap();
        assert_eq!(store.get(id).unwrap().progress, 500);
    }

    #[test]
    fn eviction_only_touches_old_terminal_jobs() {
        let store = JobStore::new();
        let running = new_job();
        let done = new_job();
        let (running_id, done_id) = (running.id, done.id);
        store.create(running).unwrap();
        store.create(done).unwrap();
        store
            .update(done_id, |j| {
                j.fail(&ScribeError::Internal("boom".into()))?;
                j.updated_at = Utc::now() - chrono::Duration::hours(48);
                Ok(())
            })
            .unwrap();

        let evicted = store.evict_terminal_before(Utc::now() - chrono::Duration::hours(24));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, done_id);
        assert!(store.get(running_id).is_some());
        assert!(store.get(done_id).is_none());
        assert_eq!(store.len(), 1);
    }
}
