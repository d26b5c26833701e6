//! dockyard-orchestrator — subscription → platform resources.
//!
//! Translates a subscription and its catalog entry into a per-user
//! namespace, a single-container deployment, a cluster service, and an
//! ingress, then records the resulting [`ServiceInstance`] in the store.
//!
//! # Architecture
//!
//! ```text
//! ResourceOrchestrator
//!   ├── naming    deterministic names (sha256 prefixes), ownership labels
//!   ├── manifest  env template rendering, resource overrides, object specs
//!   ├── Platform  check-then-create / delete-tolerating-absence
//!   └── StateStore instance record, subscription link, catalog quota
//! ```
//!
//! Ingress failures are reported, not fatal: the instance stays reachable
//! through its internal URL. Teardown keeps a namespace while any other
//! live instance of the same user still lives in it.
//!
//! [`ServiceInstance`]: dockyard_state::ServiceInstance

pub mod error;
pub mod manifest;
pub mod naming;
pub mod orchestrator;

pub use error::{OrchestratorError, OrchestratorResult};
pub use manifest::{ManifestError, ResourceOverrides};
pub use naming::ResourceNames;
pub use orchestrator::{
    Ensured, OrchestratorSettings, PodLogs, ProvisionReport, ResourceOrchestrator, TeardownReport,
};
