//! In-memory control plane with fault injection.
//!
//! Backs the daemon's `simulated` platform mode and every test that needs a
//! platform. Deployments become fully ready as soon as they are created or
//! scaled unless a replica override is in place, and one pod is synthesized
//! per desired replica.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::client::PlatformClient;
use crate::error::{PlatformError, PlatformResult};
use crate::objects::*;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Debug, Clone, Copy)]
struct ReplicaOverride {
    ready: u32,
    available: u32,
}

#[derive(Debug)]
struct SimState {
    reachable: bool,
    heal_on_restart: bool,
    namespaces: BTreeMap<String, NamespaceObject>,
    deployments: BTreeMap<Key, DeploymentObject>,
    services: BTreeMap<Key, ServiceObject>,
    ingresses: BTreeMap<Key, IngressObject>,
    nodes: BTreeMap<String, PlatformNode>,
    overrides: BTreeMap<Key, ReplicaOverride>,
    container_restarts: BTreeMap<Key, u32>,
    rollout_restarts: BTreeMap<Key, u32>,
    logs: BTreeMap<Key, String>,
    failing: BTreeSet<(ObjectKind, String)>,
    evicted: Vec<Key>,
    calls: Vec<String>,
}

/// An in-memory [`PlatformClient`].
#[derive(Debug)]
pub struct SimulatedPlatform {
    state: Mutex<SimState>,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                reachable: true,
                heal_on_restart: true,
                namespaces: BTreeMap::new(),
                deployments: BTreeMap::new(),
                services: BTreeMap::new(),
                ingresses: BTreeMap::new(),
                nodes: BTreeMap::new(),
                overrides: BTreeMap::new(),
                container_restarts: BTreeMap::new(),
                rollout_restarts: BTreeMap::new(),
                logs: BTreeMap::new(),
                failing: BTreeSet::new(),
                evicted: Vec::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Fault injection ────────────────────────────────────────────

    /// Make every call fail with `Unavailable` while `false`.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Make mutating calls on the named object fail with a server error.
    pub fn fail_on(&self, kind: ObjectKind, name: &str) {
        self.lock().failing.insert((kind, name.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Pin a deployment's observed ready/available counts.
    pub fn set_replica_status(&self, namespace: &str, name: &str, ready: u32, available: u32) {
        self.lock()
            .overrides
            .insert(key(namespace, name), ReplicaOverride { ready, available });
    }

    pub fn clear_replica_status(&self, namespace: &str, name: &str) {
        self.lock().overrides.remove(&key(namespace, name));
    }

    /// Whether a rollout restart clears the replica override (default on).
    pub fn set_heal_on_restart(&self, heal: bool) {
        self.lock().heal_on_restart = heal;
    }

    /// Container restart count reported on every pod of a deployment.
    pub fn set_container_restarts(&self, namespace: &str, deployment: &str, restarts: u32) {
        self.lock()
            .container_restarts
            .insert(key(namespace, deployment), restarts);
    }

    /// Log text returned for every pod of a deployment.
    pub fn set_logs(&self, namespace: &str, deployment: &str, logs: &str) {
        self.lock()
            .logs
            .insert(key(namespace, deployment), logs.to_string());
    }

    pub fn add_node(&self, name: &str) {
        self.lock().nodes.insert(
            name.to_string(),
            PlatformNode {
                name: name.to_string(),
                ready: true,
                unschedulable: false,
                labels: Labels::new(),
            },
        );
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn has_namespace(&self, name: &str) -> bool {
        self.lock().namespaces.contains_key(name)
    }

    pub fn has_deployment(&self, namespace: &str, name: &str) -> bool {
        self.lock().deployments.contains_key(&key(namespace, name))
    }

    pub fn has_service(&self, namespace: &str, name: &str) -> bool {
        self.lock().services.contains_key(&key(namespace, name))
    }

    pub fn has_ingress(&self, namespace: &str, name: &str) -> bool {
        self.lock().ingresses.contains_key(&key(namespace, name))
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<DeploymentObject> {
        let state = self.lock();
        state
            .deployments
            .get(&key(namespace, name))
            .map(|d| with_status(&state, d))
    }

    pub fn deployment_count(&self) -> usize {
        self.lock().deployments.len()
    }

    pub fn object_count(&self) -> usize {
        let state = self.lock();
        state.namespaces.len()
            + state.deployments.len()
            + state.services.len()
            + state.ingresses.len()
    }

    /// Number of rollout restarts requested for a deployment.
    pub fn rollout_restarts(&self, namespace: &str, name: &str) -> u32 {
        self.lock()
            .rollout_restarts
            .get(&key(namespace, name))
            .copied()
            .unwrap_or(0)
    }

    pub fn node(&self, name: &str) -> Option<PlatformNode> {
        self.lock().nodes.get(name).cloned()
    }

    /// Pods evicted so far, as `(namespace, pod)`.
    pub fn evicted(&self) -> Vec<(String, String)> {
        self.lock().evicted.clone()
    }

    /// Mutating calls in order, e.g. `create deployment dy-1a2b/ghost-3c4d`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }
}

impl SimState {
    fn check_reachable(&self) -> PlatformResult<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(PlatformError::Unavailable("simulated outage".to_string()))
        }
    }

    fn check_mutation(&mut self, verb: &str, kind: ObjectKind, path: &str, name: &str) -> PlatformResult<()> {
        self.check_reachable()?;
        if self.failing.contains(&(kind, name.to_string())) {
            return Err(PlatformError::Api {
                code: 500,
                message: format!("injected failure on {kind} {name}"),
            });
        }
        self.calls.push(format!("{verb} {kind} {path}"));
        Ok(())
    }
}

fn with_status(state: &SimState, deployment: &DeploymentObject) -> DeploymentObject {
    let desired = deployment.replicas;
    let (ready, available) = match state
        .overrides
        .get(&key(&deployment.namespace, &deployment.name))
    {
        Some(o) => (o.ready, o.available),
        None => (desired, desired),
    };
    DeploymentObject {
        status: ReplicaCounts {
            desired,
            ready,
            available,
            updated: desired,
        },
        ..deployment.clone()
    }
}

fn synthesize_pods(state: &SimState, deployment: &DeploymentObject) -> Vec<PodObject> {
    let observed = with_status(state, deployment);
    let k = key(&deployment.namespace, &deployment.name);
    let restarts = state.container_restarts.get(&k).copied().unwrap_or(0);
    let node = state.nodes.keys().next().cloned();
    (0..observed.status.desired)
        .map(|i| {
            let ready = i < observed.status.ready;
            PodObject {
                name: format!("{}-{i}", deployment.name),
                namespace: deployment.namespace.clone(),
                labels: deployment.pod_labels.clone(),
                phase: if ready { "Running" } else { "Pending" }.to_string(),
                ready,
                restart_count: restarts,
                node_name: node.clone(),
                message: (!ready).then(|| "CrashLoopBackOff".to_string()),
            }
        })
        .collect()
}

fn not_found(kind: ObjectKind, path: &str) -> PlatformError {
    PlatformError::NotFound(format!("{kind} {path}"))
}

fn already_exists(kind: ObjectKind, path: &str) -> PlatformError {
    PlatformError::AlreadyExists(format!("{kind} {path}"))
}

#[async_trait]
impl PlatformClient for SimulatedPlatform {
    async fn ping(&self) -> PlatformResult<()> {
        self.lock().check_reachable()
    }

    async fn get_namespace(&self, name: &str) -> PlatformResult<Option<NamespaceObject>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state.namespaces.get(name).cloned())
    }

    async fn create_namespace(&self, namespace: &NamespaceObject) -> PlatformResult<()> {
        let mut state = self.lock();
        if state.namespaces.contains_key(&namespace.name) {
            state.check_reachable()?;
            return Err(already_exists(ObjectKind::Namespace, &namespace.name));
        }
        state.check_mutation("create", ObjectKind::Namespace, &namespace.name, &namespace.name)?;
        state
            .namespaces
            .insert(namespace.name.clone(), namespace.clone());
        debug!(namespace = %namespace.name, "simulated namespace created");
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> PlatformResult<()> {
        let mut state = self.lock();
        state.check_reachable()?;
        if !state.namespaces.contains_key(name) {
            return Err(not_found(ObjectKind::Namespace, name));
        }
        state.check_mutation("delete", ObjectKind::Namespace, name, name)?;
        state.namespaces.remove(name);
        // Namespace deletion cascades to everything inside it.
        state.deployments.retain(|(ns, _), _| ns != name);
        state.services.retain(|(ns, _), _| ns != name);
        state.ingresses.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn list_namespaces(&self, selector: &Labels) -> PlatformResult<Vec<NamespaceObject>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state
            .namespaces
            .values()
            .filter(|ns| matches_selector(&ns.labels, selector))
            .cloned()
            .collect())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<DeploymentObject>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state
            .deployments
            .get(&key(namespace, name))
            .map(|d| with_status(&state, d)))
    }

    async fn create_deployment(&self, deployment: &DeploymentObject) -> PlatformResult<()> {
        let mut state = self.lock();
        let path = format!("{}/{}", deployment.namespace, deployment.name);
        state.check_reachable()?;
        if !state.namespaces.contains_key(&deployment.namespace) {
            return Err(not_found(ObjectKind::Namespace, &deployment.namespace));
        }
        let k = key(&deployment.namespace, &deployment.name);
        if state.deployments.contains_key(&k) {
            return Err(already_exists(ObjectKind::Deployment, &path));
        }
        state.check_mutation("create", ObjectKind::Deployment, &path, &deployment.name)?;
        state.deployments.insert(k, deployment.clone());
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> PlatformResult<()> {
        let mut state = self.lock();
        let path = format!("{namespace}/{name}");
        state.check_reachable()?;
        let k = key(namespace, name);
        if !state.deployments.contains_key(&k) {
            return Err(not_found(ObjectKind::Deployment, &path));
        }
        state.check_mutation("delete", ObjectKind::Deployment, &path, name)?;
        state.deployments.remove(&k);
        state.overrides.remove(&k);
        Ok(())
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> PlatformResult<Vec<DeploymentObject>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state
            .deployments
            .values()
            .filter(|d| d.namespace == namespace && matches_selector(&d.labels, selector))
            .map(|d| with_status(&state, d))
            .collect())
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> PlatformResult<()> {
        let mut state = self.lock();
        let path = format!("{namespace}/{name}");
        state.check_reachable()?;
        let k = key(namespace, name);
        if !state.deployments.contains_key(&k) {
            return Err(not_found(ObjectKind::Deployment, &path));
        }
        state.check_mutation("scale", ObjectKind::Deployment, &path, name)?;
        if let Some(d) = state.deployments.get_mut(&k) {
            d.replicas = replicas;
        }
        Ok(())
    }

    async fn restart_deployment(
        &self,
        namespace: &str,
        name: &str,
        _at: DateTime<Utc>,
    ) -> PlatformResult<()> {
        let mut state = self.lock();
        let path = format!("{namespace}/{name}");
        state.check_reachable()?;
        let k = key(namespace, name);
        if !state.deployments.contains_key(&k) {
            return Err(not_found(ObjectKind::Deployment, &path));
        }
        state.check_mutation("restart", ObjectKind::Deployment, &path, name)?;
        *state.rollout_restarts.entry(k.clone()).or_insert(0) += 1;
        if state.heal_on_restart {
            state.overrides.remove(&k);
        }
        Ok(())
    }

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<ServiceObject>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state.services.get(&key(namespace, name)).cloned())
    }

    async fn create_service(&self, service: &ServiceObject) -> PlatformResult<()> {
        let mut state = self.lock();
        let path = format!("{}/{}", service.namespace, service.name);
        state.check_reachable()?;
        let k = key(&service.namespace, &service.name);
        if state.services.contains_key(&k) {
            return Err(already_exists(ObjectKind::Service, &path));
        }
        state.check_mutation("create", ObjectKind::Service, &path, &service.name)?;
        state.services.insert(k, service.clone());
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> PlatformResult<()> {
        let mut state = self.lock();
        let path = format!("{namespace}/{name}");
        state.check_reachable()?;
        let k = key(namespace, name);
        if !state.services.contains_key(&k) {
            return Err(not_found(ObjectKind::Service, &path));
        }
        state.check_mutation("delete", ObjectKind::Service, &path, name)?;
        state.services.remove(&k);
        Ok(())
    }

    async fn get_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<IngressObject>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state.ingresses.get(&key(namespace, name)).cloned())
    }

    async fn create_ingress(&self, ingress: &IngressObject) -> PlatformResult<()> {
        let mut state = self.lock();
        let path = format!("{}/{}", ingress.namespace, ingress.name);
        state.check_reachable()?;
        let k = key(&ingress.namespace, &ingress.name);
        if state.ingresses.contains_key(&k) {
            return Err(already_exists(ObjectKind::Ingress, &path));
        }
        state.check_mutation("create", ObjectKind::Ingress, &path, &ingress.name)?;
        state.ingresses.insert(k, ingress.clone());
        Ok(())
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> PlatformResult<()> {
        let mut state = self.lock();
        let path = format!("{namespace}/{name}");
        state.check_reachable()?;
        let k = key(namespace, name);
        if !state.ingresses.contains_key(&k) {
            return Err(not_found(ObjectKind::Ingress, &path));
        }
        state.check_mutation("delete", ObjectKind::Ingress, &path, name)?;
        state.ingresses.remove(&k);
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> PlatformResult<Vec<PodObject>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state
            .deployments
            .values()
            .filter(|d| d.namespace == namespace)
            .flat_map(|d| synthesize_pods(&state, d))
            .filter(|p| matches_selector(&p.labels, selector))
            .collect())
    }

    async fn list_pods_on_node(&self, node: &str) -> PlatformResult<Vec<PodObject>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state
            .deployments
            .values()
            .flat_map(|d| synthesize_pods(&state, d))
            .filter(|p| p.node_name.as_deref() == Some(node))
            .collect())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        tail_lines: Option<i64>,
    ) -> PlatformResult<String> {
        let state = self.lock();
        state.check_reachable()?;
        let owner = state
            .deployments
            .values()
            .find(|d| {
                d.namespace == namespace
                    && pod
                        .strip_prefix(d.name.as_str())
                        .is_some_and(|rest| rest.starts_with('-'))
            })
            .ok_or_else(|| not_found(ObjectKind::Pod, &format!("{namespace}/{pod}")))?;
        let text = state
            .logs
            .get(&key(namespace, &owner.name))
            .cloned()
            .unwrap_or_default();
        Ok(match tail_lines {
            Some(n) if n >= 0 => {
                let lines: Vec<&str> = text.lines().collect();
                let skip = lines.len().saturating_sub(n as usize);
                lines[skip..].join("\n")
            }
            _ => text,
        })
    }

    async fn evict_pod(&self, namespace: &str, pod: &str) -> PlatformResult<()> {
        let mut state = self.lock();
        let path = format!("{namespace}/{pod}");
        state.check_mutation("evict", ObjectKind::Pod, &path, pod)?;
        state.evicted.push(key(namespace, pod));
        Ok(())
    }

    async fn list_nodes(&self) -> PlatformResult<Vec<PlatformNode>> {
        let state = self.lock();
        state.check_reachable()?;
        Ok(state.nodes.values().cloned().collect())
    }

    async fn set_node_schedulable(&self, node: &str, schedulable: bool) -> PlatformResult<()> {
        let mut state = self.lock();
        state.check_reachable()?;
        if !state.nodes.contains_key(node) {
            return Err(not_found(ObjectKind::Node, node));
        }
        let verb = if schedulable { "uncordon" } else { "cordon" };
        state.check_mutation(verb, ObjectKind::Node, node, node)?;
        if let Some(n) = state.nodes.get_mut(node) {
            n.unschedulable = !schedulable;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_state::ResourceSpec;

    fn ns(name: &str) -> NamespaceObject {
        let mut labels = Labels::new();
        labels.insert("dockyard.io/managed-by".into(), "dockyard".into());
        NamespaceObject {
            name: name.into(),
            labels,
        }
    }

    fn deployment(namespace: &str, name: &str, replicas: u32) -> DeploymentObject {
        let mut pod_labels = Labels::new();
        pod_labels.insert("app".into(), name.into());
        DeploymentObject {
            name: name.into(),
            namespace: namespace.into(),
            labels: pod_labels.clone(),
            pod_labels,
            container_name: "app".into(),
            image: "ghost:5".into(),
            container_port: 2368,
            replicas,
            env: BTreeMap::new(),
            resources: ResourceSpec {
                cpu_request: "100m".into(),
                cpu_limit: "500m".into(),
                memory_request: "256Mi".into(),
                memory_limit: "512Mi".into(),
            },
            status: ReplicaCounts::default(),
        }
    }

    #[tokio::test]
    async fn deployments_are_ready_by_default() {
        let sim = SimulatedPlatform::new();
        sim.create_namespace(&ns("dy-a")).await.unwrap();
        sim.create_deployment(&deployment("dy-a", "ghost-1", 2)).await.unwrap();

        let d = sim.get_deployment("dy-a", "ghost-1").await.unwrap().unwrap();
        assert_eq!(d.status.ready, 2);
        assert_eq!(d.status.available, 2);

        sim.set_replica_status("dy-a", "ghost-1", 0, 0);
        let d = sim.get_deployment("dy-a", "ghost-1").await.unwrap().unwrap();
        assert_eq!(d.status.available, 0);
        assert_eq!(d.status.desired, 2);
    }

    #[tokio::test]
    async fn duplicate_create_and_missing_delete() {
        let sim = SimulatedPlatform::new();
        sim.create_namespace(&ns("dy-a")).await.unwrap();
        let err = sim.create_namespace(&ns("dy-a")).await.unwrap_err();
        assert!(err.is_already_exists());

        let err = sim.delete_service("dy-a", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn deployment_requires_namespace() {
        let sim = SimulatedPlatform::new();
        let err = sim
            .create_deployment(&deployment("dy-missing", "ghost-1", 1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn outage_fails_everything() {
        let sim = SimulatedPlatform::new();
        sim.set_reachable(false);
        assert!(sim.ping().await.unwrap_err().is_connectivity());
        assert!(sim.get_namespace("x").await.unwrap_err().is_connectivity());
        assert!(sim.create_namespace(&ns("x")).await.unwrap_err().is_connectivity());
    }

    #[tokio::test]
    async fn injected_failure_hits_named_object_only() {
        let sim = SimulatedPlatform::new();
        sim.create_namespace(&ns("dy-a")).await.unwrap();
        sim.fail_on(ObjectKind::Deployment, "bad");
        assert!(matches!(
            sim.create_deployment(&deployment("dy-a", "bad", 1)).await,
            Err(PlatformError::Api { code: 500, .. })
        ));
        sim.create_deployment(&deployment("dy-a", "good", 1)).await.unwrap();
    }

    #[tokio::test]
    async fn restart_heals_override() {
        let sim = SimulatedPlatform::new();
        sim.create_namespace(&ns("dy-a")).await.unwrap();
        sim.create_deployment(&deployment("dy-a", "ghost-1", 1)).await.unwrap();
        sim.set_replica_status("dy-a", "ghost-1", 0, 0);

        sim.restart_deployment("dy-a", "ghost-1", Utc::now()).await.unwrap();
        assert_eq!(sim.rollout_restarts("dy-a", "ghost-1"), 1);
        let d = sim.get_deployment("dy-a", "ghost-1").await.unwrap().unwrap();
        assert_eq!(d.status.ready, 1);
    }

    #[tokio::test]
    async fn pods_and_logs_follow_deployments() {
        let sim = SimulatedPlatform::new();
        sim.add_node("worker-1");
        sim.create_namespace(&ns("dy-a")).await.unwrap();
        sim.create_deployment(&deployment("dy-a", "ghost-1", 2)).await.unwrap();
        sim.set_container_restarts("dy-a", "ghost-1", 4);
        sim.set_logs("dy-a", "ghost-1", "one\ntwo\nthree");

        let mut selector = Labels::new();
        selector.insert("app".into(), "ghost-1".into());
        let pods = sim.list_pods("dy-a", &selector).await.unwrap();
        assert_eq!(pods.len(), 2);
        assert!(pods.iter().all(|p| p.restart_count == 4));

        let on_node = sim.list_pods_on_node("worker-1").await.unwrap();
        assert_eq!(on_node.len(), 2);

        let logs = sim.pod_logs("dy-a", "ghost-1-0", Some(2)).await.unwrap();
        assert_eq!(logs, "two\nthree");
    }

    #[tokio::test]
    async fn namespace_delete_cascades() {
        let sim = SimulatedPlatform::new();
        sim.create_namespace(&ns("dy-a")).await.unwrap();
        sim.create_deployment(&deployment("dy-a", "ghost-1", 1)).await.unwrap();
        sim.delete_namespace("dy-a").await.unwrap();
        assert_eq!(sim.object_count(), 0);
    }

    #[tokio::test]
    async fn cordon_round_trip() {
        let sim = SimulatedPlatform::new();
        sim.add_node("worker-1");
        sim.set_node_schedulable("worker-1", false).await.unwrap();
        assert!(sim.node("worker-1").unwrap().unschedulable);
        sim.set_node_schedulable("worker-1", true).await.unwrap();
        assert!(!sim.node("worker-1").unwrap().unschedulable);
        assert_eq!(
            sim.calls(),
            vec!["cordon node worker-1", "uncordon node worker-1"]
        );
    }
}
