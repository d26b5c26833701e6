//! dockyard-orphan — finds and removes workloads nobody owns.
//!
//! A deployment in a Dockyard-managed namespace is an orphan when no live
//! [`ServiceInstance`] references its `(namespace, name)`. Orphans appear
//! when a record is lost or a teardown is interrupted after the record
//! was marked DELETED.
//!
//! Detection is read-only. Cleanup requires an explicit `confirm`; without
//! it the result only reports `confirmation_required`.
//!
//! [`ServiceInstance`]: dockyard_state::ServiceInstance

pub mod detector;
pub mod error;

pub use detector::{CleanupResult, Orphan, OrphanDetector};
pub use error::{OrphanError, OrphanResult};
