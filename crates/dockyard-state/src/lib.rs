//! dockyard-state — embedded state store for Dockyard.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for subscriptions, service instances, worker nodes, the service
//! catalog, usage metrics, and queued jobs.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by identity. Usage samples use `{instance_id}:{millis}` composite
//! keys so a prefix scan returns one instance's history in time order.
//!
//! Mutations that only touch part of a record go through the `update_*`
//! methods, which read and write inside one write transaction. Periodic
//! sweeps and queue jobs interleave freely, so a whole-record `put_*` of a
//! stale copy would silently revert someone else's change.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
