//! Operator actions on worker nodes, mirrored to the platform.

use serde::Serialize;
use tracing::{info, warn};

use dockyard_core::SharedClock;
use dockyard_platform::{Platform, PlatformResult};
use dockyard_state::{NodeStatus, StateStore, WorkerNode};

use crate::classify::{Thresholds, reclassify};
use crate::error::{HealthError, HealthResult};

#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    pub node_id: String,
    /// `namespace/pod` of every evicted pod.
    pub evicted: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct NodeAdmin {
    state: StateStore,
    platform: Platform,
    clock: SharedClock,
    thresholds: Thresholds,
}

/// A node Dockyard knows but the platform does not is still managed locally.
fn tolerate_missing(result: PlatformResult<()>, node: &WorkerNode) -> HealthResult<()> {
    match result {
        Err(e) if e.is_not_found() => {
            warn!(hostname = %node.hostname, "node unknown to the platform");
            Ok(())
        }
        other => Ok(other?),
    }
}

impl NodeAdmin {
    pub fn new(
        state: StateStore,
        platform: Platform,
        clock: SharedClock,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            state,
            platform,
            clock,
            thresholds,
        }
    }

    fn node(&self, node_id: &str) -> HealthResult<WorkerNode> {
        self.state
            .get_node(node_id)?
            .ok_or_else(|| HealthError::NodeNotFound(node_id.to_string()))
    }

    fn store<F>(&self, node_id: &str, f: F) -> HealthResult<WorkerNode>
    where
        F: FnOnce(&mut WorkerNode),
    {
        let now = self.clock.now();
        self.state
            .update_node(node_id, |n| {
                f(n);
                n.updated_at = now;
            })?
            .ok_or_else(|| HealthError::NodeNotFound(node_id.to_string()))
    }

    /// Stop new work landing on the node.
    pub async fn cordon(&self, node_id: &str) -> HealthResult<WorkerNode> {
        let node = self.node(node_id)?;
        tolerate_missing(
            self.platform.set_node_schedulable(&node.hostname, false).await,
            &node,
        )?;
        let node = self.store(node_id, |n| {
            n.cordoned = true;
            n.schedulable = false;
        })?;
        info!(%node_id, hostname = %node.hostname, "node cordoned");
        Ok(node)
    }

    /// Lift a cordon or maintenance; health status is recomputed.
    pub async fn uncordon(&self, node_id: &str) -> HealthResult<WorkerNode> {
        let node = self.node(node_id)?;
        tolerate_missing(
            self.platform.set_node_schedulable(&node.hostname, true).await,
            &node,
        )?;
        let now = self.clock.now();
        let node = self.store(node_id, |n| {
            n.cordoned = false;
            if n.status == NodeStatus::Maintenance {
                n.status = NodeStatus::Pending;
            }
            reclassify(n, now, &self.thresholds);
        })?;
        info!(%node_id, status = ?node.status, "node uncordoned");
        Ok(node)
    }

    /// Cordon, evict every pod on the node, and enter MAINTENANCE.
    ///
    /// Eviction failures are collected; the node enters MAINTENANCE anyway
    /// so the operator can retry the drain.
    pub async fn drain(&self, node_id: &str) -> HealthResult<DrainReport> {
        let node = self.cordon(node_id).await?;
        let mut report = DrainReport {
            node_id: node_id.to_string(),
            ..Default::default()
        };
        for pod in self.platform.list_pods_on_node(&node.hostname).await? {
            let path = format!("{}/{}", pod.namespace, pod.name);
            match self.platform.evict_pod(&pod.namespace, &pod.name).await {
                Ok(()) => report.evicted.push(path),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(%node_id, pod = %path, error = %e, "eviction failed");
                    report.errors.push(format!("{path}: {e}"));
                }
            }
        }
        self.store(node_id, |n| {
            n.status = NodeStatus::Maintenance;
            n.schedulable = false;
        })?;
        info!(
            %node_id,
            evicted = report.evicted.len(),
            errors = report.errors.len(),
            "node drained"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{DateTime, Utc};
    use dockyard_core::ManualClock;
    use dockyard_platform::{
        DeploymentObject, NamespaceObject, PlatformClient, ReplicaCounts, SimulatedPlatform,
    };
    use dockyard_state::ResourceSpec;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn setup() -> (NodeAdmin, Arc<SimulatedPlatform>, StateStore, WorkerNode) {
        let state = StateStore::open_in_memory().unwrap();
        let sim = Arc::new(SimulatedPlatform::new());
        sim.add_node("worker-1");
        let platform = Platform::connect(sim.clone()).await;
        let mut node = WorkerNode::new("worker-1", "10.0.0.1", Default::default(), t0());
        node.last_heartbeat = Some(t0());
        node.status = NodeStatus::Active;
        node.ready = true;
        node.schedulable = true;
        state.put_node(&node).unwrap();
        let admin = NodeAdmin::new(
            state.clone(),
            platform,
            Arc::new(ManualClock::new(t0())),
            Thresholds::default(),
        );
        (admin, sim, state, node)
    }

    #[tokio::test]
    async fn cordon_round_trip_mirrors_platform() {
        let (admin, sim, _, node) = setup().await;
        let cordoned = admin.cordon(&node.id).await.unwrap();
        assert!(cordoned.cordoned && !cordoned.schedulable);
        assert!(sim.node("worker-1").unwrap().unschedulable);

        let back = admin.uncordon(&node.id).await.unwrap();
        assert!(!back.cordoned && back.schedulable);
        assert_eq!(back.status, NodeStatus::Active);
        assert!(!sim.node("worker-1").unwrap().unschedulable);
    }

    #[tokio::test]
    async fn drain_evicts_and_enters_maintenance() {
        let (admin, sim, state, node) = setup().await;
        sim.create_namespace(&NamespaceObject {
            name: "dy-a".into(),
            labels: Default::default(),
        })
        .await
        .unwrap();
        sim.create_deployment(&DeploymentObject {
            name: "app".into(),
            namespace: "dy-a".into(),
            labels: Default::default(),
            pod_labels: Default::default(),
            container_name: "app".into(),
            image: "nginx".into(),
            container_port: 80,
            replicas: 2,
            env: Default::default(),
            resources: ResourceSpec {
                cpu_request: "100m".into(),
                cpu_limit: "100m".into(),
                memory_request: "64Mi".into(),
                memory_limit: "64Mi".into(),
            },
            status: ReplicaCounts::default(),
        })
        .await
        .unwrap();

        let report = admin.drain(&node.id).await.unwrap();
        assert_eq!(report.evicted.len(), 2);
        assert!(report.errors.is_empty());
        let stored = state.get_node(&node.id).unwrap().unwrap();
        assert_eq!(stored.status, NodeStatus::Maintenance);
        assert!(stored.cordoned);

        let back = admin.uncordon(&node.id).await.unwrap();
        assert_eq!(back.status, NodeStatus::Active);
    }

    #[tokio::test]
    async fn nodes_missing_on_platform_are_still_cordoned() {
        let (admin, _, state, _) = setup().await;
        let other = WorkerNode::new("edge-9", "10.0.0.9", Default::default(), t0());
        state.put_node(&other).unwrap();
        assert!(admin.cordon(&other.id).await.unwrap().cordoned);
    }
}
