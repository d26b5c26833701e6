//! redb table definitions for the Dockyard state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Subscriptions keyed by `{subscription_id}`.
pub const SUBSCRIPTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("subscriptions");

/// Service instances keyed by `{instance_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Worker nodes keyed by `{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Service catalog entries keyed by `{service_id}`.
pub const CATALOG: TableDefinition<&str, &[u8]> = TableDefinition::new("catalog");

/// Usage samples keyed by `{instance_id}:{recorded_at_millis:020}`.
pub const USAGE: TableDefinition<&str, &[u8]> = TableDefinition::new("usage");

/// Queued jobs keyed by `{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");
