//! dockyard-reconciler — observed platform state → persisted instance state.
//!
//! # Architecture
//!
//! ```text
//! StatusReconciler (every reconciler.interval)
//!   ├── Platform::get_deployment → Observation
//!   ├── derive_status(Observation) → PodStatus     (pure)
//!   ├── StateStore::update_instance on drift        (targeted)
//!   └── JobQueue::notify(pod_ready) on → RUNNING
//!
//! UsageCollector (every reconciler.metrics_interval)
//!   ├── Platform::list_pods → restart counts
//!   └── StateStore::put_usage / prune_usage_before
//! ```
//!
//! When the control plane is unreachable the sweep writes nothing and
//! reports itself degraded. An ERROR status is only ever returned from
//! [`StatusReconciler::resolve_status`], never persisted.

pub mod error;
pub mod reconciler;
pub mod status;
pub mod usage;

pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{PodDetail, ReplicaSummary, StatusReconciler, StatusReport, SweepReport};
pub use status::{Observation, derive_status};
pub use usage::{UsageCollector, UsageReport};
