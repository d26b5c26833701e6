//! dockyard-platform — the control-plane facade for Dockyard.
//!
//! Everything Dockyard does to the container-orchestration platform goes
//! through the [`PlatformClient`] trait, wrapped by the clonable [`Platform`]
//! facade that tracks connectivity.
//!
//! # Architecture
//!
//! ```text
//! Platform (Arc<dyn PlatformClient> + readiness flag)
//!   ├── KubePlatform       kube::Api<Namespace|Deployment|Service|Ingress|Pod|Node>
//!   └── SimulatedPlatform  in-memory objects, fault injection, call log
//! ```
//!
//! Errors are normalized to [`PlatformError`]: a name conflict on create is
//! `AlreadyExists`, a missing object on delete is `NotFound`, and transport
//! failures are `Unavailable`. Only `Unavailable` flips the facade to not
//! ready.

pub mod client;
pub mod error;
pub mod kubernetes;
pub mod objects;
pub mod simulated;

pub use client::{Platform, PlatformClient};
pub use error::{PlatformError, PlatformResult};
pub use kubernetes::KubePlatform;
pub use objects::*;
pub use simulated::SimulatedPlatform;
