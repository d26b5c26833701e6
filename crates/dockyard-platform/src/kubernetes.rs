//! [`PlatformClient`] over the Kubernetes API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Namespace, Node, Pod, PodSpec, PodTemplateSpec,
    ResourceRequirements, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{DeleteParams, EvictParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

use dockyard_state::ResourceSpec;

use crate::client::PlatformClient;
use crate::error::{PlatformError, PlatformResult};
use crate::objects::*;

/// Kubernetes-backed platform client.
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
}

impl KubePlatform {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient kubeconfig or in-cluster service account.
    pub async fn try_default() -> PlatformResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| PlatformError::Unavailable(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn ingresses(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

/// Map a kube error onto the platform taxonomy.
fn map_kube_err(what: &str, err: kube::Error) -> PlatformError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => PlatformError::NotFound(what.to_string()),
        kube::Error::Api(resp) if resp.code == 409 => {
            PlatformError::AlreadyExists(what.to_string())
        }
        kube::Error::Api(resp) => PlatformError::Api {
            code: resp.code,
            message: resp.message,
        },
        kube::Error::HyperError(e) => PlatformError::Unavailable(e.to_string()),
        kube::Error::Service(e) => PlatformError::Unavailable(e.to_string()),
        other => PlatformError::Invalid(other.to_string()),
    }
}

fn list_params(selector: &Labels) -> ListParams {
    if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&selector_string(selector))
    }
}

fn meta(name: &str, namespace: Option<&str>, labels: &Labels) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels.clone()),
        ..Default::default()
    }
}

fn labels_of(meta: &ObjectMeta) -> Labels {
    meta.labels.clone().unwrap_or_default()
}

fn to_u32(n: Option<i32>) -> u32 {
    n.unwrap_or(0).max(0) as u32
}

// ── Conversions ────────────────────────────────────────────────────

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

fn deployment_to_k8s(d: &DeploymentObject) -> Deployment {
    let container = Container {
        name: d.container_name.clone(),
        image: Some(d.image.clone()),
        ports: Some(vec![ContainerPort {
            container_port: i32::from(d.container_port),
            name: Some("http".to_string()),
            ..Default::default()
        }]),
        env: Some(
            d.env
                .iter()
                .map(|(name, value)| EnvVar {
                    name: name.clone(),
                    value: Some(value.clone()),
                    ..Default::default()
                })
                .collect(),
        ),
        resources: Some(ResourceRequirements {
            requests: Some(quantities(&d.resources.cpu_request, &d.resources.memory_request)),
            limits: Some(quantities(&d.resources.cpu_limit, &d.resources.memory_limit)),
            ..Default::default()
        }),
        ..Default::default()
    };
    Deployment {
        metadata: meta(&d.name, Some(&d.namespace), &d.labels),
        spec: Some(DeploymentSpec {
            replicas: Some(d.replicas as i32),
            selector: LabelSelector {
                match_labels: Some(d.pod_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(d.pod_labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn deployment_from_k8s(d: Deployment) -> DeploymentObject {
    let labels = labels_of(&d.metadata);
    let spec = d.spec.unwrap_or_default();
    let status = d.status.unwrap_or_default();
    let container = spec
        .template
        .spec
        .and_then(|s| s.containers.into_iter().next())
        .unwrap_or_default();
    let resources = container.resources.unwrap_or_default();
    let quantity = |map: &Option<BTreeMap<String, Quantity>>, key: &str| {
        map.as_ref()
            .and_then(|m| m.get(key))
            .map(|q| q.0.clone())
            .unwrap_or_default()
    };
    let desired = to_u32(spec.replicas.or(Some(1)));
    DeploymentObject {
        name: d.metadata.name.unwrap_or_default(),
        namespace: d.metadata.namespace.unwrap_or_default(),
        labels,
        pod_labels: spec.selector.match_labels.unwrap_or_default(),
        container_name: container.name,
        image: container.image.unwrap_or_default(),
        container_port: container
            .ports
            .and_then(|p| p.first().map(|p| p.container_port))
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(0),
        replicas: desired,
        env: container
            .env
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| e.value.map(|v| (e.name, v)))
            .collect(),
        resources: ResourceSpec {
            cpu_request: quantity(&resources.requests, "cpu"),
            cpu_limit: quantity(&resources.limits, "cpu"),
            memory_request: quantity(&resources.requests, "memory"),
            memory_limit: quantity(&resources.limits, "memory"),
        },
        status: ReplicaCounts {
            desired,
            ready: to_u32(status.ready_replicas),
            available: to_u32(status.available_replicas),
            updated: to_u32(status.updated_replicas),
        },
    }
}

fn service_to_k8s(s: &ServiceObject) -> Service {
    Service {
        metadata: meta(&s.name, Some(&s.namespace), &s.labels),
        spec: Some(ServiceSpec {
            selector: Some(s.selector.clone()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: i32::from(s.port),
                target_port: Some(IntOrString::Int(i32::from(s.target_port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service_from_k8s(s: Service) -> ServiceObject {
    let labels = labels_of(&s.metadata);
    let spec = s.spec.unwrap_or_default();
    let port = spec.ports.and_then(|p| p.into_iter().next()).unwrap_or_default();
    let target_port = match port.target_port {
        Some(IntOrString::Int(n)) => u16::try_from(n).unwrap_or(0),
        _ => 0,
    };
    ServiceObject {
        name: s.metadata.name.unwrap_or_default(),
        namespace: s.metadata.namespace.unwrap_or_default(),
        labels,
        selector: spec.selector.unwrap_or_default(),
        port: u16::try_from(port.port).unwrap_or(0),
        target_port,
    }
}

fn ingress_to_k8s(i: &IngressObject) -> Ingress {
    let path = HTTPIngressPath {
        path: Some("/".to_string()),
        path_type: "Prefix".to_string(),
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: i.service_name.clone(),
                port: Some(ServiceBackendPort {
                    number: Some(i32::from(i.service_port)),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        },
    };
    Ingress {
        metadata: meta(&i.name, Some(&i.namespace), &i.labels),
        spec: Some(IngressSpec {
            ingress_class_name: i.ingress_class.clone(),
            rules: Some(vec![IngressRule {
                host: Some(i.host.clone()),
                http: Some(HTTPIngressRuleValue { paths: vec![path] }),
            }]),
            tls: i.tls_secret.as_ref().map(|secret| {
                vec![IngressTLS {
                    hosts: Some(vec![i.host.clone()]),
                    secret_name: Some(secret.clone()),
                }]
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ingress_from_k8s(i: Ingress) -> IngressObject {
    let labels = labels_of(&i.metadata);
    let spec = i.spec.unwrap_or_default();
    let rule = spec.rules.and_then(|r| r.into_iter().next()).unwrap_or_default();
    let backend = rule
        .http
        .and_then(|h| h.paths.into_iter().next())
        .and_then(|p| p.backend.service);
    IngressObject {
        name: i.metadata.name.unwrap_or_default(),
        namespace: i.metadata.namespace.unwrap_or_default(),
        labels,
        host: rule.host.unwrap_or_default(),
        service_name: backend.as_ref().map(|b| b.name.clone()).unwrap_or_default(),
        service_port: backend
            .and_then(|b| b.port)
            .and_then(|p| p.number)
            .and_then(|n| u16::try_from(n).ok())
            .unwrap_or(0),
        ingress_class: spec.ingress_class_name,
        tls_secret: spec
            .tls
            .and_then(|t| t.into_iter().next())
            .and_then(|t| t.secret_name),
    }
}

fn pod_from_k8s(p: Pod) -> PodObject {
    let labels = labels_of(&p.metadata);
    let status = p.status.unwrap_or_default();
    let containers = status.container_statuses.unwrap_or_default();
    let message = containers.iter().find(|c| !c.ready).and_then(|c| {
        let state = c.state.as_ref()?;
        state
            .waiting
            .as_ref()
            .and_then(|w| w.reason.clone())
            .or_else(|| state.terminated.as_ref().and_then(|t| t.reason.clone()))
    });
    PodObject {
        name: p.metadata.name.unwrap_or_default(),
        namespace: p.metadata.namespace.unwrap_or_default(),
        labels,
        phase: status.phase.unwrap_or_else(|| "Unknown".to_string()),
        ready: !containers.is_empty() && containers.iter().all(|c| c.ready),
        restart_count: containers.iter().map(|c| c.restart_count.max(0) as u32).sum(),
        node_name: p.spec.and_then(|s| s.node_name),
        message,
    }
}

fn node_from_k8s(n: Node) -> PlatformNode {
    let ready = n
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        });
    PlatformNode {
        name: n.metadata.name.clone().unwrap_or_default(),
        ready,
        unschedulable: n.spec.and_then(|s| s.unschedulable).unwrap_or(false),
        labels: labels_of(&n.metadata),
    }
}

#[async_trait]
impl PlatformClient for KubePlatform {
    async fn ping(&self) -> PlatformResult<()> {
        self.client
            .apiserver_version()
            .await
            .map(|_| ())
            .map_err(|e| map_kube_err("apiserver", e))
    }

    async fn get_namespace(&self, name: &str) -> PlatformResult<Option<NamespaceObject>> {
        let ns = self
            .namespaces()
            .get_opt(name)
            .await
            .map_err(|e| map_kube_err(name, e))?;
        Ok(ns.map(|ns| NamespaceObject {
            labels: labels_of(&ns.metadata),
            name: ns.metadata.name.unwrap_or_default(),
        }))
    }

    async fn create_namespace(&self, namespace: &NamespaceObject) -> PlatformResult<()> {
        let ns = Namespace {
            metadata: meta(&namespace.name, None, &namespace.labels),
            ..Default::default()
        };
        self.namespaces()
            .create(&PostParams::default(), &ns)
            .await
            .map_err(|e| map_kube_err(&namespace.name, e))?;
        debug!(namespace = %namespace.name, "namespace created");
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> PlatformResult<()> {
        self.namespaces()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_err(name, e))?;
        Ok(())
    }

    async fn list_namespaces(&self, selector: &Labels) -> PlatformResult<Vec<NamespaceObject>> {
        let list = self
            .namespaces()
            .list(&list_params(selector))
            .await
            .map_err(|e| map_kube_err("namespaces", e))?;
        Ok(list
            .items
            .into_iter()
            .map(|ns| NamespaceObject {
                labels: labels_of(&ns.metadata),
                name: ns.metadata.name.unwrap_or_default(),
            })
            .collect())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<DeploymentObject>> {
        let d = self
            .deployments(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_err(name, e))?;
        Ok(d.map(deployment_from_k8s))
    }

    async fn create_deployment(&self, deployment: &DeploymentObject) -> PlatformResult<()> {
        self.deployments(&deployment.namespace)
            .create(&PostParams::default(), &deployment_to_k8s(deployment))
            .await
            .map_err(|e| map_kube_err(&deployment.name, e))?;
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> PlatformResult<()> {
        self.deployments(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_err(name, e))?;
        Ok(())
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> PlatformResult<Vec<DeploymentObject>> {
        let list = self
            .deployments(namespace)
            .list(&list_params(selector))
            .await
            .map_err(|e| map_kube_err(namespace, e))?;
        Ok(list.items.into_iter().map(deployment_from_k8s).collect())
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> PlatformResult<()> {
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_err(name, e))?;
        Ok(())
    }

    async fn restart_deployment(
        &self,
        namespace: &str,
        name: &str,
        at: DateTime<Utc>,
    ) -> PlatformResult<()> {
        // Same annotation `kubectl rollout restart` sets.
        let patch = serde_json::json!({
            "spec": { "template": { "metadata": { "annotations": {
                "kubectl.kubernetes.io/restartedAt": at.to_rfc3339()
            }}}}
        });
        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_err(name, e))?;
        Ok(())
    }

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<ServiceObject>> {
        let s = self
            .services(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_err(name, e))?;
        Ok(s.map(service_from_k8s))
    }

    async fn create_service(&self, service: &ServiceObject) -> PlatformResult<()> {
        self.services(&service.namespace)
            .create(&PostParams::default(), &service_to_k8s(service))
            .await
            .map_err(|e| map_kube_err(&service.name, e))?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> PlatformResult<()> {
        self.services(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_err(name, e))?;
        Ok(())
    }

    async fn get_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> PlatformResult<Option<IngressObject>> {
        let i = self
            .ingresses(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_err(name, e))?;
        Ok(i.map(ingress_from_k8s))
    }

    async fn create_ingress(&self, ingress: &IngressObject) -> PlatformResult<()> {
        self.ingresses(&ingress.namespace)
            .create(&PostParams::default(), &ingress_to_k8s(ingress))
            .await
            .map_err(|e| map_kube_err(&ingress.name, e))?;
        Ok(())
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> PlatformResult<()> {
        self.ingresses(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_err(name, e))?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> PlatformResult<Vec<PodObject>> {
        let list = self
            .pods(namespace)
            .list(&list_params(selector))
            .await
            .map_err(|e| map_kube_err(namespace, e))?;
        Ok(list.items.into_iter().map(pod_from_k8s).collect())
    }

    async fn list_pods_on_node(&self, node: &str) -> PlatformResult<Vec<PodObject>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node}"));
        let list = api.list(&params).await.map_err(|e| map_kube_err(node, e))?;
        Ok(list.items.into_iter().map(pod_from_k8s).collect())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        tail_lines: Option<i64>,
    ) -> PlatformResult<String> {
        let params = LogParams {
            tail_lines,
            ..Default::default()
        };
        self.pods(namespace)
            .logs(pod, &params)
            .await
            .map_err(|e| map_kube_err(pod, e))
    }

    async fn evict_pod(&self, namespace: &str, pod: &str) -> PlatformResult<()> {
        self.pods(namespace)
            .evict(pod, &EvictParams::default())
            .await
            .map_err(|e| map_kube_err(pod, e))?;
        Ok(())
    }

    async fn list_nodes(&self) -> PlatformResult<Vec<PlatformNode>> {
        let list = self
            .nodes()
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_err("nodes", e))?;
        Ok(list.items.into_iter().map(node_from_k8s).collect())
    }

    async fn set_node_schedulable(&self, node: &str, schedulable: bool) -> PlatformResult<()> {
        let patch = serde_json::json!({ "spec": { "unschedulable": !schedulable } });
        self.nodes()
            .patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_err(node, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_deployment() -> DeploymentObject {
        let mut pod_labels = Labels::new();
        pod_labels.insert("dockyard.io/subscription".into(), "sub-1".into());
        DeploymentObject {
            name: "ghost-1a2b3c4d".into(),
            namespace: "dy-5e6f7a8b".into(),
            labels: pod_labels.clone(),
            pod_labels,
            container_name: "ghost".into(),
            image: "ghost:5-alpine".into(),
            container_port: 2368,
            replicas: 1,
            env: BTreeMap::from([("url".to_string(), "https://blog.apps.local".to_string())]),
            resources: ResourceSpec {
                cpu_request: "100m".into(),
                cpu_limit: "500m".into(),
                memory_request: "256Mi".into(),
                memory_limit: "512Mi".into(),
            },
            status: ReplicaCounts::default(),
        }
    }

    #[test]
    fn deployment_manifest_carries_spec_fields() {
        let d = deployment_to_k8s(&sample_deployment());
        let spec = d.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        let container = &spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("ghost:5-alpine"));
        let limits = container.resources.as_ref().unwrap().limits.as_ref().unwrap();
        assert_eq!(limits["memory"], Quantity("512Mi".into()));
    }

    #[test]
    fn deployment_status_is_read_back() {
        let mut d = deployment_to_k8s(&sample_deployment());
        d.status = Some(k8s_openapi::api::apps::v1::DeploymentStatus {
            ready_replicas: Some(1),
            available_replicas: Some(1),
            updated_replicas: Some(1),
            ..Default::default()
        });
        let back = deployment_from_k8s(d);
        assert_eq!(back.status.ready, 1);
        assert_eq!(back.container_port, 2368);
        assert_eq!(back.resources.cpu_limit, "500m");
        assert_eq!(back.env.get("url").map(String::as_str), Some("https://blog.apps.local"));
    }

    #[test]
    fn ingress_tls_is_optional() {
        let mut ing = IngressObject {
            name: "ghost-1a2b3c4d-ing".into(),
            namespace: "dy-5e6f7a8b".into(),
            labels: Labels::new(),
            host: "blog.apps.local".into(),
            service_name: "ghost-1a2b3c4d-svc".into(),
            service_port: 80,
            ingress_class: Some("nginx".into()),
            tls_secret: None,
        };
        assert!(ingress_to_k8s(&ing).spec.unwrap().tls.is_none());
        ing.tls_secret = Some("ghost-1a2b3c4d-tls".into());
        let back = ingress_from_k8s(ingress_to_k8s(&ing));
        assert_eq!(back, ing);
    }

    #[test]
    fn api_errors_map_to_taxonomy() {
        let resp = |code| {
            kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".into(),
                message: "boom".into(),
                reason: "x".into(),
                code,
            })
        };
        assert!(map_kube_err("x", resp(404)).is_not_found());
        assert!(map_kube_err("x", resp(409)).is_already_exists());
        assert_eq!(
            map_kube_err("x", resp(500)),
            PlatformError::Api {
                code: 500,
                message: "boom".into()
            }
        );
    }
}
