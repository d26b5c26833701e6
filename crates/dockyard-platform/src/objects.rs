//! Platform-neutral views of the control-plane objects Dockyard manages.
//!
//! These are the shapes the orchestrator builds and the reconciler reads.
//! Backends translate them to and from their native API types.

use std::collections::BTreeMap;

use dockyard_state::ResourceSpec;

/// Label key/value pairs; also used as an equality selector for lists.
pub type Labels = BTreeMap<String, String>;

/// Render a selector as `k1=v1,k2=v2` (sorted, deterministic).
pub fn selector_string(selector: &Labels) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `labels` carries every pair in `selector`.
pub fn matches_selector(labels: &Labels, selector: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceObject {
    pub name: String,
    pub labels: Labels,
}

/// Observed replica counts from a deployment's status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaCounts {
    pub desired: u32,
    pub ready: u32,
    pub available: u32,
    pub updated: u32,
}

/// A single-container deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentObject {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    /// Labels stamped on pods; doubles as the deployment's selector.
    pub pod_labels: Labels,
    pub container_name: String,
    pub image: String,
    pub container_port: u16,
    pub replicas: u32,
    pub env: BTreeMap<String, String>,
    pub resources: ResourceSpec,
    /// Populated on reads; ignored on create.
    pub status: ReplicaCounts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceObject {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub selector: Labels,
    pub port: u16,
    pub target_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressObject {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub host: String,
    pub service_name: String,
    pub service_port: u16,
    pub ingress_class: Option<String>,
    /// Secret holding the TLS certificate; `None` serves plain HTTP.
    pub tls_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodObject {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    /// Platform phase string (`Pending`, `Running`, `Failed`, ...).
    pub phase: String,
    pub ready: bool,
    /// Sum of container restart counts.
    pub restart_count: u32,
    pub node_name: Option<String>,
    /// Waiting/terminated reason of the first unhealthy container.
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformNode {
    pub name: String,
    pub ready: bool,
    pub unschedulable: bool,
    pub labels: Labels,
}

/// Kinds of objects, used for fault injection and call logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Namespace,
    Deployment,
    Service,
    Ingress,
    Pod,
    Node,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Namespace => "namespace",
            Self::Deployment => "deployment",
            Self::Service => "service",
            Self::Ingress => "ingress",
            Self::Pod => "pod",
            Self::Node => "node",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_rendering_is_sorted() {
        let mut sel = Labels::new();
        sel.insert("dockyard.io/user".into(), "u1".into());
        sel.insert("dockyard.io/managed-by".into(), "dockyard".into());
        assert_eq!(
            selector_string(&sel),
            "dockyard.io/managed-by=dockyard,dockyard.io/user=u1"
        );
    }

    #[test]
    fn selector_matching() {
        let mut labels = Labels::new();
        labels.insert("a".into(), "1".into());
        labels.insert("b".into(), "2".into());
        let mut sel = Labels::new();
        assert!(matches_selector(&labels, &sel));
        sel.insert("a".into(), "1".into());
        assert!(matches_selector(&labels, &sel));
        sel.insert("b".into(), "3".into());
        assert!(!matches_selector(&labels, &sel));
    }
}
