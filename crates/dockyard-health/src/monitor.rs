//! Worker health monitor: heartbeat ingest and the periodic node sweep.
//!
//! Every status change is computed inside a node's update transaction
//! from the heartbeat already stored there, so a heartbeat racing the
//! sweep can never be overwritten by a stale classification.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use dockyard_core::SharedClock;
use dockyard_state::{NodeResources, NodeStatus, StateStore, WorkerNode};

use crate::classify::{Thresholds, reclassify};
use crate::error::{HealthError, HealthResult};

/// Registration request for a new worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub hostname: String,
    pub address: String,
    #[serde(default)]
    pub capacity: NodeResources,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A heartbeat from a worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    /// When the worker sent it; defaults to receipt time.
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allocated: Option<NodeResources>,
}

/// Counts after a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeSweepReport {
    pub active: usize,
    pub not_ready: usize,
    pub inactive: usize,
    /// `(node_id, from, to)` for every node whose status changed.
    pub transitions: Vec<(String, NodeStatus, NodeStatus)>,
    /// `(node_id, error)` for nodes that could not be reclassified.
    pub errors: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct WorkerHealthMonitor {
    state: StateStore,
    clock: SharedClock,
    thresholds: Thresholds,
}

impl WorkerHealthMonitor {
    pub fn new(state: StateStore, clock: SharedClock, thresholds: Thresholds) -> Self {
        Self {
            state,
            clock,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Register a worker in PENDING. Hostnames are unique.
    pub fn register(&self, req: NodeRegistration) -> HealthResult<WorkerNode> {
        if self
            .state
            .list_nodes()?
            .iter()
            .any(|n| n.hostname == req.hostname)
        {
            return Err(HealthError::AlreadyRegistered(req.hostname));
        }
        let mut node = WorkerNode::new(&req.hostname, &req.address, req.capacity, self.clock.now());
        node.labels = req.labels;
        self.state.put_node(&node)?;
        info!(node_id = %node.id, hostname = %node.hostname, "worker registered");
        Ok(node)
    }

    pub fn deregister(&self, node_id: &str) -> HealthResult<()> {
        if !self.state.delete_node(node_id)? {
            return Err(HealthError::NodeNotFound(node_id.to_string()));
        }
        info!(%node_id, "worker deregistered");
        Ok(())
    }

    /// Record a heartbeat. The stored timestamp only ever moves forward and
    /// never past the monitor's own clock.
    pub fn record_heartbeat(&self, node_id: &str, beat: Heartbeat) -> HealthResult<WorkerNode> {
        let now = self.clock.now();
        let sent = beat.sent_at.map_or(now, |t| t.min(now));
        let mut transition = None;
        let node = self
            .state
            .update_node(node_id, |n| {
                if n.last_heartbeat.is_none_or(|prev| sent > prev) {
                    n.last_heartbeat = Some(sent);
                }
                if let Some(allocated) = beat.allocated {
                    n.allocated = allocated;
                }
                transition = reclassify(n, now, &self.thresholds).map(|from| (from, n.status));
                n.updated_at = now;
            })?
            .ok_or_else(|| HealthError::NodeNotFound(node_id.to_string()))?;
        if let Some((from, to)) = transition {
            info!(%node_id, ?from, ?to, "worker status changed on heartbeat");
        } else {
            debug!(%node_id, "heartbeat recorded");
        }
        Ok(node)
    }

    /// Reclassify every node against the clock.
    pub fn sweep(&self) -> HealthResult<NodeSweepReport> {
        let now = self.clock.now();
        let mut report = NodeSweepReport::default();
        for node_id in self.state.list_node_ids()? {
            let mut transition = None;
            let updated = match self.state.update_node(&node_id, |n| {
                if let Some(from) = reclassify(n, now, &self.thresholds) {
                    transition = Some((from, n.status));
                    n.updated_at = now;
                }
            }) {
                Ok(Some(n)) => n,
                // Deregistered mid-sweep.
                Ok(None) => continue,
                Err(e) => {
                    warn!(%node_id, error = %e, "node update failed");
                    report.errors.push((node_id, e.to_string()));
                    continue;
                }
            };
            match updated.status {
                NodeStatus::Active => report.active += 1,
                NodeStatus::NotReady => report.not_ready += 1,
                NodeStatus::Inactive => report.inactive += 1,
                NodeStatus::Pending | NodeStatus::Maintenance => {}
            }
            if let Some((from, to)) = transition {
                warn_or_info(&updated, from, to);
                report.transitions.push((updated.id.clone(), from, to));
            }
        }
        debug!(
            active = report.active,
            not_ready = report.not_ready,
            inactive = report.inactive,
            errors = report.errors.len(),
            "worker sweep complete"
        );
        Ok(report)
    }

    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?interval, "worker health monitor started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.sweep() {
                        error!(error = %e, "worker sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("worker health monitor shutting down");
                    break;
                }
            }
        }
    }
}

fn warn_or_info(node: &WorkerNode, from: NodeStatus, to: NodeStatus) {
    if to == NodeStatus::Active {
        info!(node_id = %node.id, hostname = %node.hostname, ?from, ?to, "worker recovered");
    } else {
        warn!(node_id = %node.id, hostname = %node.hostname, ?from, ?to, "worker degraded");
    }
}
