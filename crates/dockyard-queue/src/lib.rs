//! dockyard-queue — lane-partitioned background jobs for Dockyard.
//!
//! Work is grouped into five lanes (subscription, pod, notification,
//! billing, cleanup), each with its own attempt ceiling, backoff, and
//! worker concurrency.
//!
//! # Architecture
//!
//! ```text
//! JobQueue
//!   ├── enqueue()          best-effort; None when the backend is down
//!   ├── per-lane workers   claim → run handler in its own task → settle
//!   │   ├── success        remove, or reschedule if recurring
//!   │   ├── failure        retry after Backoff::delay_for(attempt)
//!   │   └── exhausted      dead-letter (recurring jobs keep their schedule)
//!   ├── janitor            prunes dead letters past their retention
//!   └── QueueBackend
//!       ├── StoreBackend   redb-persisted, survives restarts
//!       └── MemoryBackend  process-local
//! ```
//!
//! Owner-facing messages travel as [`Notification`] payloads on the
//! notification lane, keyed by [`NotificationKind`] job types.
//!
//! A fixed job id deduplicates: while a job with that id is waiting or
//! active, enqueueing it again is a no-op.

pub mod backend;
pub mod error;
pub mod job;
pub mod lane;
pub mod manager;
pub mod notify;

pub use backend::{LaneCounts, MemoryBackend, QueueBackend, StoreBackend};
pub use error::{QueueError, QueueResult};
pub use job::{Handlers, JobContext, JobHandle, JobHandler, JobOptions, handler_fn};
pub use lane::{Backoff, Lane, LanePolicies, LanePolicy};
pub use manager::{JobOutcome, JobQueue};
pub use notify::{Notification, NotificationKind};
