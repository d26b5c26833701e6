//! StateStore: redb-backed state persistence for Dockyard.
//!
//! Provides typed CRUD operations over subscriptions, instances, nodes,
//! catalog entries, usage samples, and jobs. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

fn decode<T: DeserializeOwned>(table: Table, key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StateError::corrupt(table.name(), key, e))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [SUBSCRIPTIONS, INSTANCES, NODES, CATALOG, USAGE, JOBS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic record access ──────────────────────────────────────

    fn put_value<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                Ok(Some(decode(table, key, guard.value())?))
            }
            None => Ok(None),
        }
    }

    fn list_values<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(table, key.value(), value.value())?);
        }
        Ok(results)
    }

    /// Keys of a table, without decoding any values.
    fn list_keys(&self, table: Table) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    fn remove_value(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Read-modify-write a single record inside one write transaction.
    ///
    /// Returns the updated record, or `None` if no record exists under `key`.
    fn update_value<T, F>(&self, table: Table, key: &str, f: F) -> StateResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let current: Option<T> = match t.get(key).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(table, key, guard.value())?),
                None => None,
            };
            match current {
                Some(mut value) => {
                    f(&mut value);
                    let bytes = serde_json::to_vec(&value).map_err(map_err!(Serialize))?;
                    t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
                    Some(value)
                }
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Subscriptions ──────────────────────────────────────────────

    /// Insert or replace a subscription.
    pub fn put_subscription(&self, sub: &Subscription) -> StateResult<()> {
        self.put_value(SUBSCRIPTIONS, sub.table_key(), sub)?;
        debug!(subscription_id = %sub.id, status = ?sub.status, "subscription stored");
        Ok(())
    }

    pub fn get_subscription(&self, id: &str) -> StateResult<Option<Subscription>> {
        self.get_value(SUBSCRIPTIONS, id)
    }

    pub fn list_subscriptions(&self) -> StateResult<Vec<Subscription>> {
        self.list_values(SUBSCRIPTIONS)
    }

    /// List subscriptions whose status is one of `statuses`.
    pub fn list_subscriptions_with_status(
        &self,
        statuses: &[SubscriptionStatus],
    ) -> StateResult<Vec<Subscription>> {
        Ok(self
            .list_subscriptions()?
            .into_iter()
            .filter(|s| statuses.contains(&s.status))
            .collect())
    }

    /// Targeted update of one subscription.
    pub fn update_subscription<F>(&self, id: &str, f: F) -> StateResult<Option<Subscription>>
    where
        F: FnOnce(&mut Subscription),
    {
        self.update_value(SUBSCRIPTIONS, id, f)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or replace an instance record.
    pub fn put_instance(&self, inst: &ServiceInstance) -> StateResult<()> {
        self.put_value(INSTANCES, &inst.id, inst)?;
        debug!(instance_id = %inst.id, status = %inst.status, "instance stored");
        Ok(())
    }

    pub fn get_instance(&self, id: &str) -> StateResult<Option<ServiceInstance>> {
        self.get_value(INSTANCES, id)
    }

    pub fn list_instances(&self) -> StateResult<Vec<ServiceInstance>> {
        self.list_values(INSTANCES)
    }

    /// All instances not marked DELETED.
    pub fn list_live_instances(&self) -> StateResult<Vec<ServiceInstance>> {
        Ok(self
            .list_instances()?
            .into_iter()
            .filter(|i| i.status.is_live())
            .collect())
    }

    /// List instances whose status is one of `statuses`.
    pub fn list_instances_with_status(
        &self,
        statuses: &[PodStatus],
    ) -> StateResult<Vec<ServiceInstance>> {
        Ok(self
            .list_instances()?
            .into_iter()
            .filter(|i| statuses.contains(&i.status))
            .collect())
    }

    /// The live instance owned by a subscription, if any.
    pub fn find_live_instance_for_subscription(
        &self,
        subscription_id: &str,
    ) -> StateResult<Option<ServiceInstance>> {
        Ok(self
            .list_live_instances()?
            .into_iter()
            .find(|i| i.subscription_id == subscription_id))
    }

    /// The live instance that references deployment `name` in `namespace`.
    pub fn find_live_instance_by_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> StateResult<Option<ServiceInstance>> {
        Ok(self
            .list_live_instances()?
            .into_iter()
            .find(|i| i.refs.namespace == namespace && i.refs.deployment == name))
    }

    /// Number of live instances in `namespace`, other than `excluding`.
    pub fn count_live_instances_in_namespace(
        &self,
        namespace: &str,
        excluding: &str,
    ) -> StateResult<usize> {
        Ok(self
            .list_live_instances()?
            .iter()
            .filter(|i| i.refs.namespace == namespace && i.id != excluding)
            .count())
    }

    /// Targeted update of one instance.
    pub fn update_instance<F>(&self, id: &str, f: F) -> StateResult<Option<ServiceInstance>>
    where
        F: FnOnce(&mut ServiceInstance),
    {
        self.update_value(INSTANCES, id, f)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or replace a worker node.
    pub fn put_node(&self, node: &WorkerNode) -> StateResult<()> {
        self.put_value(NODES, &node.id, node)
    }

    pub fn get_node(&self, node_id: &str) -> StateResult<Option<WorkerNode>> {
        self.get_value(NODES, node_id)
    }

    pub fn list_nodes(&self) -> StateResult<Vec<WorkerNode>> {
        self.list_values(NODES)
    }

    /// Node ids only; one undecodable record does not hide the others.
    pub fn list_node_ids(&self) -> StateResult<Vec<String>> {
        self.list_keys(NODES)
    }

    /// Targeted update of one node.
    pub fn update_node<F>(&self, node_id: &str, f: F) -> StateResult<Option<WorkerNode>>
    where
        F: FnOnce(&mut WorkerNode),
    {
        self.update_value(NODES, node_id, f)
    }

    /// Delete a node by ID. Returns true if it existed.
    pub fn delete_node(&self, node_id: &str) -> StateResult<bool> {
        self.remove_value(NODES, node_id)
    }

    // ── Catalog ────────────────────────────────────────────────────

    pub fn put_catalog_entry(&self, entry: &CatalogEntry) -> StateResult<()> {
        self.put_value(CATALOG, &entry.id, entry)
    }

    pub fn get_catalog_entry(&self, id: &str) -> StateResult<Option<CatalogEntry>> {
        self.get_value(CATALOG, id)
    }

    pub fn list_catalog(&self) -> StateResult<Vec<CatalogEntry>> {
        self.list_values(CATALOG)
    }

    /// Targeted update of one catalog entry.
    pub fn update_catalog_entry<F>(&self, id: &str, f: F) -> StateResult<Option<CatalogEntry>>
    where
        F: FnOnce(&mut CatalogEntry),
    {
        self.update_value(CATALOG, id, f)
    }

    // ── Usage ──────────────────────────────────────────────────────

    /// Insert a usage sample.
    pub fn put_usage(&self, sample: &UsageMetric) -> StateResult<()> {
        self.put_value(USAGE, &sample.table_key(), sample)
    }

    /// The most recent `limit` samples for an instance, newest first.
    pub fn list_usage_for_instance(
        &self,
        instance_id: &str,
        limit: usize,
    ) -> StateResult<Vec<UsageMetric>> {
        // ';' sorts directly after ':', bounding the prefix scan.
        let start = format!("{instance_id}:");
        let end = format!("{instance_id};");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(USAGE).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(USAGE, key.value(), value.value())?);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    /// Delete usage samples recorded before `cutoff`. Returns number deleted.
    pub fn prune_usage_before(&self, cutoff: DateTime<Utc>) -> StateResult<u32> {
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let t = txn.open_table(USAGE).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in t.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let sample: UsageMetric = decode(USAGE, key.value(), value.value())?;
                if sample.recorded_at < cutoff {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(USAGE).map_err(map_err!(Table))?;
            for key in &keys {
                t.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(u32::try_from(keys.len()).unwrap_or(u32::MAX))
    }

    // ── Jobs ───────────────────────────────────────────────────────

    pub fn put_job(&self, job: &JobRecord) -> StateResult<()> {
        self.put_value(JOBS, &job.id, job)
    }

    pub fn get_job(&self, id: &str) -> StateResult<Option<JobRecord>> {
        self.get_value(JOBS, id)
    }

    pub fn list_jobs(&self) -> StateResult<Vec<JobRecord>> {
        self.list_values(JOBS)
    }

    pub fn delete_job(&self, id: &str) -> StateResult<bool> {
        self.remove_value(JOBS, id)
    }

    /// Targeted update of one job.
    pub fn update_job<F>(&self, id: &str, f: F) -> StateResult<Option<JobRecord>>
    where
        F: FnOnce(&mut JobRecord),
    {
        self.update_value(JOBS, id, f)
    }

    /// Delete dead-lettered jobs last touched before `cutoff`.
    pub fn prune_dead_jobs_before(&self, cutoff: DateTime<Utc>) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let pruned = {
            let mut t = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut stale = Vec::new();
            for entry in t.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let job: JobRecord = decode(JOBS, key.value(), value.value())?;
                if job.state == JobState::DeadLettered && job.updated_at < cutoff {
                    stale.push(job.id);
                }
            }
            for id in &stale {
                t.remove(id.as_str()).map_err(map_err!(Write))?;
            }
            stale.len()
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(pruned)
    }

    /// Atomically claim the next ready job in `lane`, marking it ACTIVE.
    ///
    /// Ready means WAITING with `run_at <= now`; among ready jobs the highest
    /// priority wins, then the earliest `run_at`, then the oldest.
    pub fn claim_next_job(&self, lane: &str, now: DateTime<Utc>) -> StateResult<Option<JobRecord>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let claimed = {
            let mut t = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut best: Option<JobRecord> = None;
            for entry in t.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let job: JobRecord = decode(JOBS, key.value(), value.value())?;
                if job.lane != lane || job.state != JobState::Waiting || job.run_at > now {
                    continue;
                }
                if best.as_ref().is_none_or(|b| job.runs_before(b)) {
                    best = Some(job);
                }
            }
            match best {
                Some(mut job) => {
                    job.state = JobState::Active;
                    job.updated_at = now;
                    let bytes = serde_json::to_vec(&job).map_err(map_err!(Serialize))?;
                    t.insert(job.id.as_str(), bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(job)
                }
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(claimed)
    }
}
