//! JobQueue: lane workers over a [`QueueBackend`].
//!
//! Lifecycle is explicit: `new` → `register_worker` → `start` → `stop`.
//! Each registered lane gets `concurrency` worker tasks that claim jobs
//! from the shared backlog; lanes never block one another.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use dockyard_core::{SharedClock, to_delta};
use dockyard_state::{JobRecord, JobState};

use crate::backend::{LaneCounts, QueueBackend, lane_counts};
use crate::error::QueueResult;
use crate::job::{Handlers, JobContext, JobHandle, JobOptions};
use crate::lane::{Lane, LanePolicies, LanePolicy};

const DEFAULT_DEAD_LETTER_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// How often the janitor prunes expired dead letters.
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// What happened to a job after one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { id: String },
    /// Recurring job finished and was rescheduled.
    Rescheduled { id: String, run_at: DateTime<Utc> },
    Retrying {
        id: String,
        attempt: u32,
        run_at: DateTime<Utc>,
        error: String,
    },
    DeadLettered { id: String, error: String },
}

struct LaneWorker {
    handlers: Handlers,
    concurrency: usize,
}

struct Inner {
    backend: Arc<dyn QueueBackend>,
    clock: SharedClock,
    policies: LanePolicies,
    poll_interval: Duration,
    dead_letter_retention: Duration,
    workers: RwLock<BTreeMap<Lane, LaneWorker>>,
    enqueue_lock: Mutex<()>,
    wake: Notify,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Clonable handle to the queue.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, clock: SharedClock) -> Self {
        Self::with_policies(backend, clock, LanePolicies::default())
    }

    pub fn with_policies(
        backend: Arc<dyn QueueBackend>,
        clock: SharedClock,
        policies: LanePolicies,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                backend,
                clock,
                policies,
                poll_interval: Duration::from_secs(1),
                dead_letter_retention: DEFAULT_DEAD_LETTER_RETENTION,
                workers: RwLock::new(BTreeMap::new()),
                enqueue_lock: Mutex::new(()),
                wake: Notify::new(),
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Set how often idle workers re-check their lane. Call before cloning.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.poll_interval = interval;
        }
        self
    }

    /// Keep dead-lettered jobs this long before pruning them. Call before cloning.
    pub fn with_dead_letter_retention(mut self, retention: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.dead_letter_retention = retention;
        }
        self
    }

    pub fn policy(&self, lane: Lane) -> LanePolicy {
        self.inner.policies.get(lane)
    }

    /// Register handlers for a lane. Repeated calls merge handler tables.
    ///
    /// `concurrency` overrides the lane policy's worker count.
    pub fn register_worker(&self, lane: Lane, handlers: Handlers, concurrency: Option<usize>) {
        let concurrency = concurrency
            .unwrap_or_else(|| self.policy(lane).concurrency)
            .max(1);
        let mut workers = self
            .inner
            .workers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let types = handlers.job_types();
        match workers.get_mut(&lane) {
            Some(w) => {
                w.handlers.extend(handlers);
                w.concurrency = concurrency;
            }
            None => {
                workers.insert(
                    lane,
                    LaneWorker {
                        handlers,
                        concurrency,
                    },
                );
            }
        }
        info!(%lane, ?types, concurrency, "lane worker registered");
    }

    /// Requeue jobs left ACTIVE by a previous run and spawn lane workers.
    pub fn start(&self) {
        let now = self.inner.clock.now();
        match self.inner.backend.requeue_active(now) {
            Ok(0) => {}
            Ok(n) => info!(requeued = n, "requeued interrupted jobs"),
            Err(e) => warn!(error = %e, "could not requeue interrupted jobs"),
        }

        let lanes: Vec<(Lane, usize)> = self
            .inner
            .workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(lane, w)| (*lane, w.concurrency))
            .collect();

        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for (lane, concurrency) in lanes {
            for slot in 0..concurrency {
                let queue = self.clone();
                let shutdown = self.inner.shutdown_tx.subscribe();
                tasks.push(tokio::spawn(async move {
                    queue.worker_loop(lane, slot, shutdown).await;
                }));
            }
            debug!(%lane, concurrency, "lane workers started");
        }
        let queue = self.clone();
        let shutdown = self.inner.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move { queue.janitor_loop(shutdown).await }));
        info!(workers = tasks.len() - 1, "job queue started");
    }

    /// Delete dead letters older than the retention window.
    pub fn prune_dead_letters(&self) -> QueueResult<usize> {
        let cutoff = self.inner.clock.now() - to_delta(self.inner.dead_letter_retention);
        let pruned = self.inner.backend.prune_dead_letters(cutoff)?;
        if pruned > 0 {
            info!(pruned, %cutoff, "expired dead letters pruned");
        }
        Ok(pruned)
    }

    async fn janitor_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.prune_dead_letters() {
                warn!(error = %e, "dead letter pruning failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(PRUNE_INTERVAL) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Signal workers to stop and wait for in-flight jobs to finish.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "lane worker ended abnormally");
            }
        }
        info!("job queue stopped");
    }

    /// Best-effort enqueue. Backend failures are logged and yield `None`.
    pub fn enqueue(
        &self,
        lane: Lane,
        job_type: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Option<JobHandle> {
        match self.try_enqueue(lane, job_type, payload, options) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(%lane, %job_type, error = %e, "enqueue failed, job dropped");
                None
            }
        }
    }

    /// Enqueue, surfacing backend errors.
    pub fn try_enqueue(
        &self,
        lane: Lane,
        job_type: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> QueueResult<JobHandle> {
        let now = self.inner.clock.now();
        let run_at = now + options.delay.map(to_delta).unwrap_or_default();
        let max_attempts = options
            .max_attempts
            .unwrap_or_else(|| self.policy(lane).max_attempts);
        let mut job = JobRecord::new(lane.as_str(), job_type, payload, max_attempts, run_at, now);
        job.priority = options.priority;
        job.repeat_every_ms = options
            .repeat_every
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        if let Some(id) = options.job_id {
            job.dedupe_key = Some(id.clone());
            job.id = id;
        }

        let (stored, inserted) = {
            let _guard = self
                .inner
                .enqueue_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.backend.insert(job)?
        };
        if inserted {
            debug!(%lane, %job_type, job_id = %stored.id, %run_at, "job enqueued");
            self.inner.wake.notify_waiters();
        } else {
            debug!(%lane, %job_type, job_id = %stored.id, "duplicate job id, enqueue skipped");
        }
        Ok(JobHandle {
            id: stored.id,
            lane,
            job_type: stored.job_type,
            run_at: stored.run_at,
            deduplicated: !inserted,
        })
    }

    pub fn lane_counts(&self, lane: Lane) -> QueueResult<LaneCounts> {
        lane_counts(self.inner.backend.as_ref(), lane.as_str(), self.inner.clock.now())
    }

    pub fn dead_letters(&self, lane: Lane) -> QueueResult<Vec<JobRecord>> {
        Ok(self
            .inner
            .backend
            .list(lane.as_str())?
            .into_iter()
            .filter(|j| j.state == JobState::DeadLettered)
            .collect())
    }

    /// A receiver that flips to `true` when the queue stops.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    async fn worker_loop(&self, lane: Lane, slot: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(%lane, slot, "lane worker running");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.process_next(lane).await {
                // Drain ready work before sleeping.
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => warn!(%lane, error = %e, "queue backend unavailable"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.inner.poll_interval) => {}
                _ = self.inner.wake.notified() => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!(%lane, slot, "lane worker exiting");
    }

    /// Claim and run one ready job of `lane` inline.
    ///
    /// Returns `Ok(None)` when nothing is ready.
    pub async fn process_next(&self, lane: Lane) -> QueueResult<Option<JobOutcome>> {
        let now = self.inner.clock.now();
        let Some(mut job) = self.inner.backend.claim(lane.as_str(), now)? else {
            return Ok(None);
        };
        let handler = self
            .inner
            .workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&lane)
            .and_then(|w| w.handlers.get(&job.job_type));

        let Some(handler) = handler else {
            let error = format!("no handler for job type {}", job.job_type);
            return self.dead_letter(job, error).map(Some);
        };

        let attempt = job.attempts + 1;
        let ctx = JobContext {
            id: job.id.clone(),
            lane,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            attempt,
            max_attempts: job.max_attempts,
        };
        debug!(%lane, job_id = %job.id, job_type = %job.job_type, attempt, "running job");

        // A separate task isolates handler panics from the worker.
        let result = tokio::spawn(async move { handler.handle(ctx).await }).await;
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(e) if e.is_panic() => Some("handler panicked".to_string()),
            Err(e) => Some(e.to_string()),
        };

        let now = self.inner.clock.now();
        job.attempts = attempt;
        job.updated_at = now;

        let Some(error) = failure else {
            return self.finish(job, now).map(Some);
        };
        job.last_error = Some(error.clone());

        if attempt >= job.max_attempts {
            if job.repeat_every_ms.is_some() {
                // A recurring sweep keeps its schedule even when one run exhausts.
                error!(%lane, job_id = %job.id, %error, attempt, "recurring job run failed");
                return self.finish(job, now).map(Some);
            }
            return self.dead_letter(job, error).map(Some);
        }

        let delay = self.policy(lane).backoff.delay_for(attempt);
        let run_at = now + to_delta(delay);
        job.state = JobState::Waiting;
        job.run_at = run_at;
        self.inner.backend.save(&job)?;
        warn!(
            %lane,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt,
            max_attempts = job.max_attempts,
            retry_in = ?delay,
            %error,
            "job failed, retrying"
        );
        Ok(Some(JobOutcome::Retrying {
            id: job.id,
            attempt,
            run_at,
            error,
        }))
    }

    /// Remove a finished job, or reschedule it if recurring.
    fn finish(&self, mut job: JobRecord, now: DateTime<Utc>) -> QueueResult<JobOutcome> {
        match job.repeat_every_ms {
            Some(ms) => {
                let run_at = now + to_delta(Duration::from_millis(ms));
                job.state = JobState::Waiting;
                job.attempts = 0;
                job.run_at = run_at;
                self.inner.backend.save(&job)?;
                debug!(job_id = %job.id, %run_at, "recurring job rescheduled");
                Ok(JobOutcome::Rescheduled { id: job.id, run_at })
            }
            None => {
                self.inner.backend.remove(&job.id)?;
                debug!(job_id = %job.id, "job completed");
                Ok(JobOutcome::Completed { id: job.id })
            }
        }
    }

    fn dead_letter(&self, mut job: JobRecord, error: String) -> QueueResult<JobOutcome> {
        job.state = JobState::DeadLettered;
        job.last_error = Some(error.clone());
        job.updated_at = self.inner.clock.now();
        self.inner.backend.save(&job)?;
        error!(
            lane = %job.lane,
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts,
            %error,
            "job dead-lettered"
        );
        Ok(JobOutcome::DeadLettered { id: job.id, error })
    }
}
