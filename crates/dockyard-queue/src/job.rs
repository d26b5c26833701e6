//! Enqueue options, job handles, and the handler trait.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::lane::Lane;

/// Options accepted by [`JobQueue::enqueue`](crate::JobQueue::enqueue).
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Higher runs first within the lane.
    pub priority: i32,
    /// Not runnable before `now + delay`.
    pub delay: Option<Duration>,
    /// Re-run every period after each completion.
    pub repeat_every: Option<Duration>,
    /// Fixed job id. While a job with this id is waiting or active, further
    /// enqueues with the same id are no-ops.
    pub job_id: Option<String>,
    /// Overrides the lane's attempt ceiling.
    pub max_attempts: Option<u32>,
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn every(mut self, period: Duration) -> Self {
        self.repeat_every = Some(period);
        self
    }

    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n.max(1));
        self
    }
}

/// Returned by a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub lane: Lane,
    pub job_type: String,
    pub run_at: DateTime<Utc>,
    /// An identical job id was already queued; nothing new was added.
    pub deduplicated: bool,
}

/// What a handler sees of the job it is running.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: String,
    pub lane: Lane,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// 1-based attempt number of this run.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl JobContext {
    /// Decode the payload into a typed struct.
    pub fn parse<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// A unit of work bound to a `(lane, job_type)`.
///
/// Returning an error (or panicking) makes the queue retry the job with the
/// lane's backoff until the attempt ceiling, then dead-letter it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: JobContext) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`JobHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, job: JobContext) -> anyhow::Result<()> {
        (self.0)(job).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Job-type → handler table for one lane.
#[derive(Clone, Default)]
pub struct Handlers(HashMap<String, Arc<dyn JobHandler>>);

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, job_type: &str, handler: Arc<dyn JobHandler>) -> Self {
        self.0.insert(job_type.to_string(), handler);
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.0.get(job_type).cloned()
    }

    pub fn extend(&mut self, other: Handlers) {
        self.0.extend(other.0);
    }

    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.0.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.job_types()).finish()
    }
}
