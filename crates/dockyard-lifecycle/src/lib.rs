//! dockyard-lifecycle — coordinators that move subscriptions and their
//! instances through their lifecycle, driven by queue jobs.
//!
//! # Architecture
//!
//! ```text
//! subscription lane ──▶ SubscriptionCoordinator
//!   check_expired    ACTIVE → EXPIRED, instance suspended
//!   warn_expiring    expiry_warning, once per subscription
//!   cleanup_expired  grace over → teardown → DELETED → quota back
//!
//! pod lane ─────────▶ PodCoordinator
//!   create_pod       provision, retry after 2^n minutes, at most 3 tries
//!   health_sweep     PENDING/RUNNING → remediate_pod (deduped, capped)
//!   remediate_pod    re-check → restart → settle → re-check → notify
//!   cleanup_failed   FAILED > 24h → delete or remediate
//!   delete_pod       teardown
//!
//! notification lane ▶ NotificationSink
//! cleanup lane ─────▶ OrphanDetector (detect + log)
//! ```

pub mod error;
pub mod handlers;
pub mod jobs;
pub mod pod;
pub mod sink;
pub mod subscription;
pub mod timings;

#[cfg(test)]
mod testing;

pub use error::{LifecycleError, LifecycleResult};
pub use handlers::{LifecycleServices, schedule_recurring};
pub use jobs::{CreatePod, InstanceRef};
pub use pod::{
    CreateOutcome, FailedCleanupReport, PodCoordinator, PodHealthReport, RemediationOutcome,
};
pub use sink::{LogNotificationSink, MemoryNotificationSink, NotificationSink};
pub use subscription::{BatchReport, SubscriptionCoordinator};
pub use timings::LifecycleTimings;
