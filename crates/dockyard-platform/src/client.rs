//! The `PlatformClient` trait and the `Platform` facade over it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::PlatformResult;
use crate::objects::*;

/// Operations Dockyard needs from a container-orchestration control plane.
///
/// `get_*` return `Ok(None)` for absent objects. `create_*` return
/// `AlreadyExists` on a name conflict and `delete_*` return `NotFound` when
/// the object is already gone; callers decide whether those are errors.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Cheap connectivity probe.
    async fn ping(&self) -> PlatformResult<()>;

    // ── Namespaces ─────────────────────────────────────────────────

    async fn get_namespace(&self, name: &str) -> PlatformResult<Option<NamespaceObject>>;
    async fn create_namespace(&self, namespace: &NamespaceObject) -> PlatformResult<()>;
    async fn delete_namespace(&self, name: &str) -> PlatformResult<()>;
    async fn list_namespaces(&self, selector: &Labels) -> PlatformResult<Vec<NamespaceObject>>;

    // ── Deployments ────────────────────────────────────────────────

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<DeploymentObject>>;
    async fn create_deployment(&self, deployment: &DeploymentObject) -> PlatformResult<()>;
    async fn delete_deployment(&self, namespace: &str, name: &str) -> PlatformResult<()>;
    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> PlatformResult<Vec<DeploymentObject>>;
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: u32)
    -> PlatformResult<()>;
    /// Trigger a rolling restart of every pod in the deployment.
    async fn restart_deployment(
        &self,
        namespace: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> PlatformResult<()>;

    // ── Services & ingresses ───────────────────────────────────────

    async fn get_service(&self, namespace: &str, name: &str)
    -> PlatformResult<Option<ServiceObject>>;
    async fn create_service(&self, service: &ServiceObject) -> PlatformResult<()>;
    async fn delete_service(&self, namespace: &str, name: &str) -> PlatformResult<()>;

    async fn get_ingress(&self, namespace: &str, name: &str)
    -> PlatformResult<Option<IngressObject>>;
    async fn create_ingress(&self, ingress: &IngressObject) -> PlatformResult<()>;
    async fn delete_ingress(&self, namespace: &str, name: &str) -> PlatformResult<()>;

    // ── Pods ───────────────────────────────────────────────────────

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> PlatformResult<Vec<PodObject>>;
    async fn list_pods_on_node(&self, node: &str) -> PlatformResult<Vec<PodObject>>;
    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        tail_lines: Option<i64>,
    ) -> PlatformResult<String>;
    async fn evict_pod(&self, namespace: &str, pod: &str) -> PlatformResult<()>;

    // ── Nodes ──────────────────────────────────────────────────────

    async fn list_nodes(&self) -> PlatformResult<Vec<PlatformNode>>;
    async fn set_node_schedulable(&self, node: &str, schedulable: bool) -> PlatformResult<()>;
}

/// Shared, dependency-injected handle to the control plane.
///
/// Every call passes through [`Platform::observe`], which tracks
/// connectivity: an `Unavailable` error marks the platform not ready and
/// any completed call marks it ready again. Dependents consult
/// [`Platform::is_ready`] to degrade instead of failing.
#[derive(Clone)]
pub struct Platform {
    client: Arc<dyn PlatformClient>,
    ready: Arc<AtomicBool>,
}

impl Platform {
    /// Wrap a client without probing it. Starts not ready.
    pub fn new(client: Arc<dyn PlatformClient>) -> Self {
        Self {
            client,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wrap a client and probe it once.
    ///
    /// An unreachable control plane is not an error here; the facade
    /// simply starts not ready and recovers on the next successful call.
    pub async fn connect(client: Arc<dyn PlatformClient>) -> Self {
        let platform = Self::new(client);
        if platform.check_connectivity().await {
            info!("control plane reachable");
        } else {
            warn!("control plane unreachable, starting degraded");
        }
        platform
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Probe the control plane and update the readiness flag.
    pub async fn check_connectivity(&self) -> bool {
        self.observe(self.client.ping().await).is_ok()
    }

    fn observe<T>(&self, result: PlatformResult<T>) -> PlatformResult<T> {
        let reachable = match &result {
            Ok(_) => true,
            Err(e) => !e.is_connectivity(),
        };
        let was = self.ready.swap(reachable, Ordering::AcqRel);
        if was && !reachable {
            warn!("control plane became unreachable");
        } else if !was && reachable {
            info!("control plane reachable again");
        }
        result
    }

    pub async fn get_namespace(&self, name: &str) -> PlatformResult<Option<NamespaceObject>> {
        self.observe(self.client.get_namespace(name).await)
    }

    pub async fn create_namespace(&self, namespace: &NamespaceObject) -> PlatformResult<()> {
        self.observe(self.client.create_namespace(namespace).await)
    }

    pub async fn delete_namespace(&self, name: &str) -> PlatformResult<()> {
        self.observe(self.client.delete_namespace(name).await)
    }

    pub async fn list_namespaces(&self, selector: &Labels) -> PlatformResult<Vec<NamespaceObject>> {
        self.observe(self.client.list_namespaces(selector).await)
    }

    pub async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<DeploymentObject>> {
        self.observe(self.client.get_deployment(namespace, name).await)
    }

    pub async fn create_deployment(&self, deployment: &DeploymentObject) -> PlatformResult<()> {
        self.observe(self.client.create_deployment(deployment).await)
    }

    pub async fn delete_deployment(&self, namespace: &str, name: &str) -> PlatformResult<()> {
        self.observe(self.client.delete_deployment(namespace, name).await)
    }

    pub async fn list_deployments(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> PlatformResult<Vec<DeploymentObject>> {
        self.observe(self.client.list_deployments(namespace, selector).await)
    }

    pub async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> PlatformResult<()> {
        self.observe(self.client.scale_deployment(namespace, name, replicas).await)
    }

    pub async fn restart_deployment(
        &self,
        namespace: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> PlatformResult<()> {
        self.observe(self.client.restart_deployment(namespace, name, at).await)
    }

    pub async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<ServiceObject>> {
        self.observe(self.client.get_service(namespace, name).await)
    }

    pub async fn create_service(&self, service: &ServiceObject) -> PlatformResult<()> {
        self.observe(self.client.create_service(service).await)
    }

    pub async fn delete_service(&self, namespace: &str, name: &str) -> PlatformResult<()> {
        self.observe(self.client.delete_service(namespace, name).await)
    }

    pub async fn get_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<IngressObject>> {
        self.observe(self.client.get_ingress(namespace, name).await)
    }

    pub async fn create_ingress(&self, ingress: &IngressObject) -> PlatformResult<()> {
        self.observe(self.client.create_ingress(ingress).await)
    }

    pub async fn delete_ingress(&self, namespace: &str, name: &str) -> PlatformResult<()> {
        self.observe(self.client.delete_ingress(namespace, name).await)
    }

    pub async fn list_pods(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> PlatformResult<Vec<PodObject>> {
        self.observe(self.client.list_pods(namespace, selector).await)
    }

    pub async fn list_pods_on_node(&self, node: &str) -> PlatformResult<Vec<PodObject>> {
        self.observe(self.client.list_pods_on_node(node).await)
    }

    pub async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        tail_lines: Option<i64>,
    ) -> PlatformResult<String> {
        self.observe(self.client.pod_logs(namespace, pod, tail_lines).await)
    }

    pub async fn evict_pod(&self, namespace: &str, pod: &str) -> PlatformResult<()> {
        self.observe(self.client.evict_pod(namespace, pod).await)
    }

    pub async fn list_nodes(&self) -> PlatformResult<Vec<PlatformNode>> {
        self.observe(self.client.list_nodes().await)
    }

    pub async fn set_node_schedulable(&self, node: &str, schedulable: bool) -> PlatformResult<()> {
        self.observe(self.client.set_node_schedulable(node, schedulable).await)
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
