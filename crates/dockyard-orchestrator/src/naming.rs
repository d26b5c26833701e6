//! Deterministic platform object names and ownership labels.
//!
//! Names are pure functions of (service, user), so every create can be
//! check-then-create and a retry lands on the same objects.

use sha2::{Digest, Sha256};

use dockyard_platform::Labels;
use dockyard_state::Subscription;

pub const LABEL_MANAGED_BY: &str = "dockyard.io/managed-by";
pub const LABEL_SUBSCRIPTION: &str = "dockyard.io/subscription";
pub const LABEL_USER: &str = "dockyard.io/user";
pub const LABEL_SERVICE: &str = "dockyard.io/service";
/// Pod selector key; one value per deployment.
pub const LABEL_APP: &str = "app.kubernetes.io/instance";

/// DNS-1123 label length limit.
const MAX_LABEL: usize = 63;
const HASH_LEN: usize = 8;
/// Room left for the `-svc` / `-ing` suffixes.
const MAX_DEPLOYMENT: usize = MAX_LABEL - 4;

/// Names of every object backing one (service, user) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub namespace: String,
    pub deployment: String,
    pub service: String,
    pub ingress: String,
}

impl ResourceNames {
    pub fn new(namespace_prefix: &str, service_slug: &str, user_id: &str) -> Self {
        let namespace = join_with_hash(namespace_prefix, &short_hash(user_id), MAX_LABEL);
        let deployment = join_with_hash(
            service_slug,
            &short_hash(&format!("{service_slug}:{user_id}")),
            MAX_DEPLOYMENT,
        );
        Self {
            service: service_name(&deployment),
            ingress: ingress_name(&deployment),
            namespace,
            deployment,
        }
    }
}

/// Name of the cluster service fronting `deployment`.
pub fn service_name(deployment: &str) -> String {
    format!("{deployment}-svc")
}

/// Name of the ingress routing to `deployment`.
pub fn ingress_name(deployment: &str) -> String {
    format!("{deployment}-ing")
}

/// First 8 hex chars of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    let digest = hex::encode(Sha256::digest(input.as_bytes()));
    digest[..HASH_LEN].to_string()
}

/// `{sanitized(base)}-{hash}`, truncating `base` so the result fits `max`.
fn join_with_hash(base: &str, hash: &str, max: usize) -> String {
    let mut base = sanitize_label(base);
    base.truncate(max - hash.len() - 1);
    let base = base.trim_end_matches('-');
    if base.is_empty() {
        format!("x-{hash}")
    } else {
        format!("{base}-{hash}")
    }
}

/// Coerce `input` into a DNS-1123 label: lowercase alphanumerics and `-`,
/// no leading/trailing `-`, at most 63 characters.
pub fn sanitize_label(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = true;
    for c in input.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.truncate(MAX_LABEL);
    out.trim_end_matches('-').to_string()
}

/// Labels stamped on every object created for `subscription`.
pub fn ownership_labels(managed_by: &str, subscription: &Subscription, service_slug: &str) -> Labels {
    Labels::from([
        (LABEL_MANAGED_BY.to_string(), managed_by.to_string()),
        (LABEL_SUBSCRIPTION.to_string(), sanitize_label(&subscription.id)),
        (LABEL_USER.to_string(), sanitize_label(&subscription.user_id)),
        (LABEL_SERVICE.to_string(), sanitize_label(service_slug)),
    ])
}

/// Labels for a per-user namespace.
pub fn namespace_labels(managed_by: &str, user_id: &str) -> Labels {
    Labels::from([
        (LABEL_MANAGED_BY.to_string(), managed_by.to_string()),
        (LABEL_USER.to_string(), sanitize_label(user_id)),
    ])
}

/// Selector matching the pods of one deployment.
pub fn pod_selector(deployment: &str) -> Labels {
    Labels::from([(LABEL_APP.to_string(), deployment.to_string())])
}

/// Selector matching everything Dockyard manages.
pub fn managed_selector(managed_by: &str) -> Labels {
    Labels::from([(LABEL_MANAGED_BY.to_string(), managed_by.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_dns_label(s: &str) -> bool {
        !s.is_empty()
            && s.len() <= MAX_LABEL
            && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !s.starts_with('-')
            && !s.ends_with('-')
    }

    #[test]
    fn names_are_deterministic() {
        let a = ResourceNames::new("dy", "ghost", "user-42");
        let b = ResourceNames::new("dy", "ghost", "user-42");
        assert_eq!(a, b);
        assert!(a.namespace.starts_with("dy-"));
        assert!(a.deployment.starts_with("ghost-"));
        assert_eq!(a.service, format!("{}-svc", a.deployment));
        assert_eq!(a.ingress, format!("{}-ing", a.deployment));
    }

    #[test]
    fn namespace_is_per_user_deployment_per_service() {
        let ghost = ResourceNames::new("dy", "ghost", "user-42");
        let n8n = ResourceNames::new("dy", "n8n", "user-42");
        let other = ResourceNames::new("dy", "ghost", "user-43");
        assert_eq!(ghost.namespace, n8n.namespace);
        assert_ne!(ghost.deployment, n8n.deployment);
        assert_ne!(ghost.namespace, other.namespace);
        assert_ne!(ghost.deployment, other.deployment);
    }

    #[test]
    fn hostile_inputs_stay_valid_labels() {
        let slug = "My_Very Long Service Name With ✨ Sparkles ".repeat(4);
        let names = ResourceNames::new("DY__prefix", &slug, "Ünïcode@user");
        for name in [&names.namespace, &names.deployment, &names.service, &names.ingress] {
            assert!(is_dns_label(name), "{name} is not a DNS label");
        }
    }

    #[test]
    fn degenerate_base_gets_placeholder() {
        let names = ResourceNames::new("---", "!!!", "u");
        assert!(names.namespace.starts_with("x-"));
        assert!(names.deployment.starts_with("x-"));
    }

    #[test]
    fn sanitize_collapses_runs() {
        assert_eq!(sanitize_label("Hello__World--"), "hello-world");
        assert_eq!(sanitize_label("-lead"), "lead");
    }
}
