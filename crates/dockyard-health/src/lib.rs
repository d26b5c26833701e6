//! dockyard-health — worker node liveness for Dockyard.
//!
//! Workers register once and then heartbeat. A periodic sweep classifies
//! every node by heartbeat age; operators cordon, uncordon, and drain
//! nodes through [`NodeAdmin`], which mirrors each action to the platform.
//!
//! # Architecture
//!
//! ```text
//! WorkerHealthMonitor
//!   ├── register / deregister
//!   ├── record_heartbeat   monotonic last_heartbeat, reclassify in-txn
//!   └── sweep (every health.sweep_interval)
//!         classify(status, last_heartbeat, now) → PENDING | ACTIVE
//!                                                 | NOT_READY | INACTIVE
//! NodeAdmin
//!   ├── cordon / uncordon  Platform::set_node_schedulable
//!   └── drain              cordon + evict pods + MAINTENANCE
//! ```
//!
//! MAINTENANCE belongs to operators: the sweep never enters or leaves it.

pub mod admin;
pub mod classify;
pub mod error;
pub mod monitor;

pub use admin::{DrainReport, NodeAdmin};
pub use classify::{Thresholds, classify};
pub use error::{HealthError, HealthResult};
pub use monitor::{Heartbeat, NodeRegistration, NodeSweepReport, WorkerHealthMonitor};
