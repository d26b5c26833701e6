//! Manifest building: catalog entry + subscription → platform objects.
//!
//! Environment templates are rendered here, before anything touches the
//! platform, so a bad template never leaves half-created resources behind.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dockyard_platform::{
    DeploymentObject, IngressObject, Labels, NamespaceObject, ReplicaCounts, ServiceObject,
};
use dockyard_state::{
    CatalogEntry, ResourceSpec, Subscription, parse_cpu_millis, parse_memory_bytes,
};

use crate::naming::{self, ResourceNames};

/// Port the cluster service listens on.
pub const SERVICE_PORT: u16 = 80;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("env {key}: unresolved placeholder {{{{ {placeholder} }}}}")]
    UnresolvedPlaceholder { key: String, placeholder: String },

    #[error("invalid template pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("resources {field}: invalid quantity {value:?}")]
    InvalidQuantity { field: &'static str, value: String },
}

/// Reject quantities that do not parse or do not fit the allocation counters.
pub fn validate_resources(spec: &ResourceSpec) -> Result<(), ManifestError> {
    let checks: [(&'static str, &String, fn(&str) -> Option<u64>); 4] = [
        ("cpu_request", &spec.cpu_request, parse_cpu_millis),
        ("cpu_limit", &spec.cpu_limit, parse_cpu_millis),
        ("memory_request", &spec.memory_request, parse_memory_bytes),
        ("memory_limit", &spec.memory_limit, parse_memory_bytes),
    ];
    for (field, value, parse) in checks {
        if parse(value).is_none() {
            return Err(ManifestError::InvalidQuantity {
                field,
                value: value.clone(),
            });
        }
    }
    Ok(())
}

/// Per-request resource adjustments; unset fields keep the catalog default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOverrides {
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

impl ResourceOverrides {
    pub fn apply(&self, base: &ResourceSpec) -> ResourceSpec {
        let pick = |o: &Option<String>, d: &String| o.clone().unwrap_or_else(|| d.clone());
        ResourceSpec {
            cpu_request: pick(&self.cpu_request, &base.cpu_request),
            cpu_limit: pick(&self.cpu_limit, &base.cpu_limit),
            memory_request: pick(&self.memory_request, &base.memory_request),
            memory_limit: pick(&self.memory_limit, &base.memory_limit),
        }
    }
}

/// Values available to `{{ placeholder }}` markers in catalog env templates.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub subdomain: String,
    pub external_url: String,
    pub internal_url: String,
    pub namespace: String,
    pub user_id: String,
    pub subscription_id: String,
}

impl TemplateContext {
    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "subdomain" => Some(&self.subdomain),
            "external_url" => Some(&self.external_url),
            "internal_url" => Some(&self.internal_url),
            "namespace" => Some(&self.namespace),
            "user_id" => Some(&self.user_id),
            "subscription_id" => Some(&self.subscription_id),
            _ => None,
        }
    }
}

/// Render every env template, failing on the first unknown placeholder.
pub fn render_env(
    templates: &BTreeMap<String, String>,
    ctx: &TemplateContext,
) -> Result<BTreeMap<String, String>, ManifestError> {
    let placeholder = Regex::new(r"\{\{\s*([A-Za-z0-9_.-]*)\s*\}\}")?;
    let mut rendered = BTreeMap::new();
    for (key, template) in templates {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in placeholder.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = ctx.lookup(name.as_str()).ok_or_else(|| {
                ManifestError::UnresolvedPlaceholder {
                    key: key.clone(),
                    placeholder: name.as_str().to_string(),
                }
            })?;
            out.push_str(&template[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&template[last..]);
        rendered.insert(key.clone(), out);
    }
    Ok(rendered)
}

/// Cluster-internal URL of an instance's service.
pub fn internal_url(names: &ResourceNames) -> String {
    format!(
        "http://{}.{}.svc.cluster.local:{SERVICE_PORT}",
        names.service, names.namespace
    )
}

/// Public host for a subscription's ingress.
pub fn external_host(subdomain: &str, domain: &str) -> String {
    format!("{}.{domain}", naming::sanitize_label(subdomain))
}

/// The full object set for one subscription.
#[derive(Debug, Clone)]
pub struct Manifests {
    pub namespace: NamespaceObject,
    pub deployment: DeploymentObject,
    pub service: ServiceObject,
    pub ingress: IngressObject,
}

/// Inputs that are not part of the subscription or catalog entry.
#[derive(Debug, Clone)]
pub struct ManifestParams<'a> {
    pub managed_by: &'a str,
    pub ingress_class: Option<&'a str>,
    pub tls: bool,
    pub host: String,
    pub resources: ResourceSpec,
    pub env: BTreeMap<String, String>,
}

pub fn build_manifests(
    names: &ResourceNames,
    subscription: &Subscription,
    entry: &CatalogEntry,
    params: ManifestParams<'_>,
) -> Manifests {
    let labels = naming::ownership_labels(params.managed_by, subscription, &entry.slug);
    let mut pod_labels: Labels = labels.clone();
    pod_labels.extend(naming::pod_selector(&names.deployment));

    Manifests {
        namespace: NamespaceObject {
            name: names.namespace.clone(),
            labels: naming::namespace_labels(params.managed_by, &subscription.user_id),
        },
        deployment: DeploymentObject {
            name: names.deployment.clone(),
            namespace: names.namespace.clone(),
            labels: labels.clone(),
            pod_labels,
            container_name: naming::sanitize_label(&entry.slug),
            image: entry.image.clone(),
            container_port: entry.container_port,
            replicas: entry.replicas.max(1),
            env: params.env,
            resources: params.resources,
            status: ReplicaCounts::default(),
        },
        service: ServiceObject {
            name: names.service.clone(),
            namespace: names.namespace.clone(),
            labels: labels.clone(),
            selector: naming::pod_selector(&names.deployment),
            port: SERVICE_PORT,
            target_port: entry.container_port,
        },
        ingress: IngressObject {
            name: names.ingress.clone(),
            namespace: names.namespace.clone(),
            labels,
            host: params.host,
            service_name: names.service.clone(),
            service_port: SERVICE_PORT,
            ingress_class: params.ingress_class.map(str::to_string),
            tls_secret: params.tls.then(|| format!("{}-tls", names.deployment)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext {
            subdomain: "myblog".into(),
            external_url: "https://myblog.apps.local".into(),
            internal_url: "http://ghost-1-svc.dy-1.svc.cluster.local:80".into(),
            namespace: "dy-1".into(),
            user_id: "u1".into(),
            subscription_id: "s1".into(),
        }
    }

    #[test]
    fn renders_known_placeholders() {
        let templates = BTreeMap::from([
            ("url".to_string(), "{{ external_url }}".to_string()),
            ("mixed".to_string(), "ns={{namespace}};u={{ user_id }}!".to_string()),
            ("plain".to_string(), "production".to_string()),
        ]);
        let env = render_env(&templates, &ctx()).unwrap();
        assert_eq!(env["url"], "https://myblog.apps.local");
        assert_eq!(env["mixed"], "ns=dy-1;u=u1!");
        assert_eq!(env["plain"], "production");
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let templates = BTreeMap::from([("db".to_string(), "{{ database_url }}".to_string())]);
        match render_env(&templates, &ctx()) {
            Err(ManifestError::UnresolvedPlaceholder { key, placeholder }) => {
                assert_eq!(key, "db");
                assert_eq!(placeholder, "database_url");
            }
            other => panic!("expected unresolved placeholder, got {other:?}"),
        }
    }

    #[test]
    fn empty_placeholder_is_an_error() {
        let templates = BTreeMap::from([("x".to_string(), "{{ }}".to_string())]);
        assert!(render_env(&templates, &ctx()).is_err());
    }

    #[test]
    fn overrides_replace_only_set_fields() {
        let base = ResourceSpec {
            cpu_request: "100m".into(),
            cpu_limit: "500m".into(),
            memory_request: "256Mi".into(),
            memory_limit: "512Mi".into(),
        };
        let overrides = ResourceOverrides {
            memory_limit: Some("1Gi".into()),
            ..Default::default()
        };
        let spec = overrides.apply(&base);
        assert_eq!(spec.memory_limit, "1Gi");
        assert_eq!(spec.cpu_request, "100m");
        assert!(validate_resources(&spec).is_ok());
    }

    #[test]
    fn oversized_quantities_are_rejected() {
        let spec = ResourceOverrides {
            memory_limit: Some("99999999999999Ti".into()),
            ..Default::default()
        }
        .apply(&ResourceSpec {
            cpu_request: "100m".into(),
            cpu_limit: "1e300".into(),
            memory_request: "256Mi".into(),
            memory_limit: "512Mi".into(),
        });
        match validate_resources(&spec) {
            Err(ManifestError::InvalidQuantity { field, .. }) => assert_eq!(field, "cpu_limit"),
            other => panic!("expected invalid quantity, got {other:?}"),
        }
    }
}
