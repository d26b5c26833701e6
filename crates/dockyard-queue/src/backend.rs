//! Queue backends: where job records live between enqueue and completion.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dockyard_state::{JobRecord, JobState, StateStore};

use crate::error::{QueueError, QueueResult};

/// Job counts for one lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct LaneCounts {
    /// Runnable now.
    pub ready: usize,
    /// Waiting for a delay, backoff, or next recurrence.
    pub delayed: usize,
    pub active: usize,
    pub dead_lettered: usize,
}

/// Storage for job records.
///
/// Claiming must be atomic: one waiting job is handed to exactly one worker.
pub trait QueueBackend: Send + Sync {
    /// Insert `job` unless a waiting or active job with the same id exists.
    /// Returns the record now holding that id.
    fn insert(&self, job: JobRecord) -> QueueResult<(JobRecord, bool)>;

    /// Atomically move the best ready job of `lane` to ACTIVE.
    fn claim(&self, lane: &str, now: DateTime<Utc>) -> QueueResult<Option<JobRecord>>;

    /// Overwrite a record the caller has claimed.
    fn save(&self, job: &JobRecord) -> QueueResult<()>;

    fn remove(&self, id: &str) -> QueueResult<()>;

    fn list(&self, lane: &str) -> QueueResult<Vec<JobRecord>>;

    /// Return ACTIVE jobs to WAITING (after a crash or restart). Returns the count.
    fn requeue_active(&self, now: DateTime<Utc>) -> QueueResult<usize>;

    /// Drop dead-lettered jobs last updated before `before`. Returns the count.
    fn prune_dead_letters(&self, before: DateTime<Utc>) -> QueueResult<usize>;
}

fn counts_of(jobs: &[JobRecord], now: DateTime<Utc>) -> LaneCounts {
    let mut c = LaneCounts::default();
    for job in jobs {
        match job.state {
            JobState::Waiting if job.run_at <= now => c.ready += 1,
            JobState::Waiting => c.delayed += 1,
            JobState::Active => c.active += 1,
            JobState::DeadLettered => c.dead_lettered += 1,
        }
    }
    c
}

/// Tally a lane's jobs by state.
pub fn lane_counts(
    backend: &dyn QueueBackend,
    lane: &str,
    now: DateTime<Utc>,
) -> QueueResult<LaneCounts> {
    Ok(counts_of(&backend.list(lane)?, now))
}

fn is_live(job: &JobRecord) -> bool {
    job.state != JobState::DeadLettered
}

// ── In-memory ──────────────────────────────────────────────────────

/// Process-local backend; jobs are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    jobs: Mutex<BTreeMap<String, JobRecord>>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails while set.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    fn jobs(&self) -> QueueResult<std::sync::MutexGuard<'_, BTreeMap<String, JobRecord>>> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(QueueError::Backend("memory backend offline".to_string()));
        }
        Ok(self.jobs.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl QueueBackend for MemoryBackend {
    fn insert(&self, job: JobRecord) -> QueueResult<(JobRecord, bool)> {
        let mut jobs = self.jobs()?;
        if let Some(existing) = jobs.get(&job.id).filter(|j| is_live(j)) {
            return Ok((existing.clone(), false));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok((job, true))
    }

    fn claim(&self, lane: &str, now: DateTime<Utc>) -> QueueResult<Option<JobRecord>> {
        let mut jobs = self.jobs()?;
        let best = jobs
            .values()
            .filter(|j| j.lane == lane && j.state == JobState::Waiting && j.run_at <= now)
            .fold(None::<&JobRecord>, |best, j| match best {
                Some(b) if !j.runs_before(b) => Some(b),
                _ => Some(j),
            })
            .map(|j| j.id.clone());
        Ok(best.and_then(|id| {
            jobs.get_mut(&id).map(|j| {
                j.state = JobState::Active;
                j.updated_at = now;
                j.clone()
            })
        }))
    }

    fn save(&self, job: &JobRecord) -> QueueResult<()> {
        self.jobs()?.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> QueueResult<()> {
        self.jobs()?.remove(id);
        Ok(())
    }

    fn list(&self, lane: &str) -> QueueResult<Vec<JobRecord>> {
        Ok(self
            .jobs()?
            .values()
            .filter(|j| j.lane == lane)
            .cloned()
            .collect())
    }

    fn requeue_active(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let mut n = 0;
        for job in self.jobs()?.values_mut() {
            if job.state == JobState::Active {
                job.state = JobState::Waiting;
                job.updated_at = now;
                n += 1;
            }
        }
        Ok(n)
    }

    fn prune_dead_letters(&self, before: DateTime<Utc>) -> QueueResult<usize> {
        let mut jobs = self.jobs()?;
        let len = jobs.len();
        jobs.retain(|_, j| is_live(j) || j.updated_at >= before);
        Ok(len - jobs.len())
    }
}

// ── Durable ────────────────────────────────────────────────────────

/// Jobs persisted in the redb state store; they survive restarts.
#[derive(Clone)]
pub struct StoreBackend {
    state: StateStore,
}

impl StoreBackend {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

impl QueueBackend for StoreBackend {
    fn insert(&self, job: JobRecord) -> QueueResult<(JobRecord, bool)> {
        if let Some(existing) = self.state.get_job(&job.id)?.filter(is_live) {
            return Ok((existing, false));
        }
        self.state.put_job(&job)?;
        Ok((job, true))
    }

    fn claim(&self, lane: &str, now: DateTime<Utc>) -> QueueResult<Option<JobRecord>> {
        Ok(self.state.claim_next_job(lane, now)?)
    }

    fn save(&self, job: &JobRecord) -> QueueResult<()> {
        Ok(self.state.put_job(job)?)
    }

    fn remove(&self, id: &str) -> QueueResult<()> {
        self.state.delete_job(id)?;
        Ok(())
    }

    fn list(&self, lane: &str) -> QueueResult<Vec<JobRecord>> {
        Ok(self
            .state
            .list_jobs()?
            .into_iter()
            .filter(|j| j.lane == lane)
            .collect())
    }

    fn requeue_active(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let mut n = 0;
        for job in self.state.list_jobs()? {
            if job.state != JobState::Active {
                continue;
            }
            self.state.update_job(&job.id, |j| {
                j.state = JobState::Waiting;
                j.updated_at = now;
            })?;
            n += 1;
        }
        Ok(n)
    }

    fn prune_dead_letters(&self, before: DateTime<Utc>) -> QueueResult<usize> {
        Ok(self.state.prune_dead_jobs_before(before)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn job(id: &str, lane: &str) -> JobRecord {
        let mut j = JobRecord::new(lane, "noop", serde_json::Value::Null, 3, now(), now());
        j.id = id.to_string();
        j
    }

    fn exercise(backend: &dyn QueueBackend) {
        let (_, inserted) = backend.insert(job("a", "pod")).unwrap();
        assert!(inserted);
        let (existing, inserted) = backend.insert(job("a", "pod")).unwrap();
        assert!(!inserted);
        assert_eq!(existing.id, "a");

        let claimed = backend.claim("pod", now()).unwrap().unwrap();
        assert_eq!(claimed.state, JobState::Active);
        assert!(backend.claim("pod", now()).unwrap().is_none());

        assert_eq!(backend.requeue_active(now()).unwrap(), 1);
        let counts = lane_counts(backend, "pod", now()).unwrap();
        assert_eq!(counts.ready, 1);

        let mut dead = backend.claim("pod", now()).unwrap().unwrap();
        dead.state = JobState::DeadLettered;
        backend.save(&dead).unwrap();
        // A dead-lettered id may be reused.
        let (_, inserted) = backend.insert(job("a", "pod")).unwrap();
        assert!(inserted);

        let mut stale = job("stale", "pod");
        stale.state = JobState::DeadLettered;
        backend.save(&stale).unwrap();
        let later = now() + chrono::TimeDelta::seconds(1);
        assert_eq!(backend.prune_dead_letters(now()).unwrap(), 0);
        assert_eq!(backend.prune_dead_letters(later).unwrap(), 1);
        assert_eq!(backend.list("pod").unwrap().len(), 1);

        backend.remove("a").unwrap();
        assert!(backend.list("pod").unwrap().is_empty());
    }

    #[test]
    fn memory_backend_contract() {
        exercise(&MemoryBackend::new());
    }

    #[test]
    fn store_backend_contract() {
        exercise(&StoreBackend::new(StateStore::open_in_memory().unwrap()));
    }

    #[test]
    fn memory_backend_outage() {
        let backend = MemoryBackend::new();
        backend.set_available(false);
        assert!(matches!(
            backend.insert(job("a", "pod")),
            Err(QueueError::Backend(_))
        ));
        backend.set_available(true);
        assert!(backend.insert(job("a", "pod")).is_ok());
    }

    #[test]
    fn durable_jobs_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.redb");
        {
            let backend = StoreBackend::new(StateStore::open(&path).unwrap());
            backend.insert(job("persisted", "cleanup")).unwrap();
            backend.claim("cleanup", now()).unwrap();
        }
        let backend = StoreBackend::new(StateStore::open(&path).unwrap());
        assert_eq!(backend.requeue_active(now()).unwrap(), 1);
        assert_eq!(backend.claim("cleanup", now()).unwrap().unwrap().id, "persisted");
    }
}
