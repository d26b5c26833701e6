//! Orphan detection and confirmed cleanup.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dockyard_orchestrator::OrchestratorSettings;
use dockyard_orchestrator::naming::{ingress_name, managed_selector, service_name};
use dockyard_platform::{Labels, ObjectKind, Platform, PlatformResult};
use dockyard_state::StateStore;

use crate::error::OrphanResult;

/// A deployment no live instance record points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Orphan {
    pub namespace: String,
    pub deployment: String,
}

impl std::fmt::Display for Orphan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.deployment)
    }
}

/// Outcome of cleaning one orphan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupResult {
    pub namespace: String,
    pub deployment: String,
    /// Nothing was done because `confirm` was not set.
    pub confirmation_required: bool,
    /// `kind/name` of every object removed.
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct OrphanDetector {
    state: StateStore,
    platform: Platform,
    managed_by: String,
    namespace_prefix: String,
}

impl OrphanDetector {
    pub fn new(state: StateStore, platform: Platform, settings: &OrchestratorSettings) -> Self {
        Self {
            state,
            platform,
            managed_by: settings.managed_by.clone(),
            namespace_prefix: settings.namespace_prefix.clone(),
        }
    }

    /// Namespaces Dockyard owns: labeled ones, or by name prefix when none
    /// carry the label (objects created before labeling).
    async fn managed_namespaces(&self) -> PlatformResult<Vec<String>> {
        let labeled = self
            .platform
            .list_namespaces(&managed_selector(&self.managed_by))
            .await?;
        if !labeled.is_empty() {
            return Ok(labeled.into_iter().map(|ns| ns.name).collect());
        }
        let prefix = format!("{}-", self.namespace_prefix);
        debug!(%prefix, "no labeled namespaces, falling back to name prefix");
        Ok(self
            .platform
            .list_namespaces(&Labels::new())
            .await?
            .into_iter()
            .map(|ns| ns.name)
            .filter(|name| name.starts_with(&prefix))
            .collect())
    }

    pub async fn find_orphans(&self) -> OrphanResult<Vec<Orphan>> {
        let mut orphans = Vec::new();
        for namespace in self.managed_namespaces().await? {
            for d in self
                .platform
                .list_deployments(&namespace, &Labels::new())
                .await?
            {
                if self
                    .state
                    .find_live_instance_by_deployment(&namespace, &d.name)?
                    .is_none()
                {
                    orphans.push(Orphan {
                        namespace: namespace.clone(),
                        deployment: d.name,
                    });
                }
            }
        }
        if orphans.is_empty() {
            debug!("no orphaned deployments");
        } else {
            warn!(count = orphans.len(), "orphaned deployments found");
        }
        Ok(orphans)
    }

    /// Delete an orphan's ingress, service, and deployment.
    ///
    /// Without `confirm` nothing is touched. Per-object failures are
    /// collected rather than aborting the rest.
    pub async fn cleanup(&self, target: &Orphan, confirm: bool) -> OrphanResult<CleanupResult> {
        let mut result = CleanupResult {
            namespace: target.namespace.clone(),
            deployment: target.deployment.clone(),
            ..Default::default()
        };
        if !confirm {
            result.confirmation_required = true;
            return Ok(result);
        }
        // An instance may have claimed the name since detection.
        if let Some(inst) = self
            .state
            .find_live_instance_by_deployment(&target.namespace, &target.deployment)?
        {
            result
                .errors
                .push(format!("deployment is owned by live instance {}", inst.id));
            return Ok(result);
        }

        let ns = target.namespace.as_str();
        let ingress = ingress_name(&target.deployment);
        let service = service_name(&target.deployment);
        let steps = [
            (ObjectKind::Ingress, ingress.as_str()),
            (ObjectKind::Service, service.as_str()),
            (ObjectKind::Deployment, target.deployment.as_str()),
        ];
        for (kind, name) in steps {
            let outcome = match kind {
                ObjectKind::Ingress => self.platform.delete_ingress(ns, name).await,
                ObjectKind::Service => self.platform.delete_service(ns, name).await,
                _ => self.platform.delete_deployment(ns, name).await,
            };
            match outcome {
                Ok(()) => result.deleted.push(format!("{kind}/{name}")),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(orphan = %target, %kind, error = %e, "orphan object not removed");
                    result.errors.push(format!("{kind}/{name}: {e}"));
                }
            }
        }
        info!(
            orphan = %target,
            deleted = result.deleted.len(),
            errors = result.errors.len(),
            "orphan cleanup finished"
        );
        Ok(result)
    }

    /// Detect, then clean every orphan.
    pub async fn cleanup_all(&self, confirm: bool) -> OrphanResult<Vec<CleanupResult>> {
        let mut results = Vec::new();
        for orphan in self.find_orphans().await? {
            results.push(self.cleanup(&orphan, confirm).await?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{DateTime, TimeDelta, Utc};
    use dockyard_core::{ManualClock, SharedClock};
    use dockyard_orchestrator::ResourceOrchestrator;
    use dockyard_orchestrator::naming::LABEL_MANAGED_BY;
    use dockyard_platform::{
        DeploymentObject, NamespaceObject, PlatformClient, ReplicaCounts, SimulatedPlatform,
    };
    use dockyard_state::{CatalogEntry, PodStatus, ResourceSpec, ServiceInstance, Subscription};

    struct Fixture {
        state: StateStore,
        sim: Arc<SimulatedPlatform>,
        orch: ResourceOrchestrator,
        detector: OrphanDetector,
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn fixture() -> Fixture {
        let state = StateStore::open_in_memory().unwrap();
        state
            .put_catalog_entry(&CatalogEntry {
                id: "svc-strapi".into(),
                slug: "strapi".into(),
                display_name: "Strapi".into(),
                image: "strapi/strapi:4".into(),
                container_port: 1337,
                replicas: 1,
                resources: ResourceSpec {
                    cpu_request: "250m".into(),
                    cpu_limit: "1".into(),
                    memory_request: "512Mi".into(),
                    memory_limit: "1Gi".into(),
                },
                env: BTreeMap::new(),
                quota: None,
                in_use: 0,
            })
            .unwrap();
        let sim = Arc::new(SimulatedPlatform::new());
        let platform = Platform::connect(sim.clone()).await;
        let clock: SharedClock = Arc::new(ManualClock::new(t0()));
        let settings = OrchestratorSettings::default();
        let orch = ResourceOrchestrator::new(state.clone(), platform.clone(), clock, settings.clone());
        let detector = OrphanDetector::new(state.clone(), platform, &settings);
        Fixture {
            state,
            sim,
            orch,
            detector,
        }
    }

    async fn provision(f: &Fixture, user: &str) -> ServiceInstance {
        let sub = Subscription::new(user, "svc-strapi", user, t0() + TimeDelta::days(30), t0());
        f.state.put_subscription(&sub).unwrap();
        f.orch.provision(&sub.id, None).await.unwrap().instance
    }

    /// The record is gone but the platform objects stayed behind.
    fn forget(f: &Fixture, inst: &ServiceInstance) {
        f.state
            .update_instance(&inst.id, |i| i.status = PodStatus::Deleted)
            .unwrap();
    }

    #[tokio::test]
    async fn owned_deployments_are_not_orphans() {
        let f = fixture().await;
        provision(&f, "alice").await;
        assert!(f.detector.find_orphans().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn orphan_round_trip() {
        let f = fixture().await;
        let kept = provision(&f, "alice").await;
        let lost = provision(&f, "bob").await;
        forget(&f, &lost);

        let orphans = f.detector.find_orphans().await.unwrap();
        assert_eq!(
            orphans,
            vec![Orphan {
                namespace: lost.refs.namespace.clone(),
                deployment: lost.refs.deployment.clone(),
            }]
        );

        let dry = f.detector.cleanup(&orphans[0], false).await.unwrap();
        assert!(dry.confirmation_required);
        assert!(dry.deleted.is_empty());
        assert!(f.sim.has_deployment(&lost.refs.namespace, &lost.refs.deployment));

        let done = f.detector.cleanup(&orphans[0], true).await.unwrap();
        assert!(!done.confirmation_required);
        assert!(done.errors.is_empty());
        assert_eq!(done.deleted.len(), 3);
        assert!(!f.sim.has_deployment(&lost.refs.namespace, &lost.refs.deployment));
        assert!(!f.sim.has_service(&lost.refs.namespace, &lost.refs.service));
        assert!(f.sim.has_deployment(&kept.refs.namespace, &kept.refs.deployment));

        assert!(f.detector.find_orphans().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deployment_without_any_record_is_found_and_removed() {
        let f = fixture().await;
        let kept = provision(&f, "alice").await;
        let managed = Labels::from([(LABEL_MANAGED_BY.to_string(), "dockyard".to_string())]);
        f.sim
            .create_namespace(&NamespaceObject {
                name: "dy-stray".into(),
                labels: managed.clone(),
            })
            .await
            .unwrap();
        f.sim
            .create_deployment(&DeploymentObject {
                name: "hand-made".into(),
                namespace: "dy-stray".into(),
                labels: managed,
                pod_labels: Labels::from([("app".to_string(), "hand-made".to_string())]),
                container_name: "app".into(),
                image: "nginx:1.27".into(),
                container_port: 80,
                replicas: 1,
                env: BTreeMap::new(),
                resources: ResourceSpec {
                    cpu_request: "100m".into(),
                    cpu_limit: "500m".into(),
                    memory_request: "64Mi".into(),
                    memory_limit: "128Mi".into(),
                },
                status: ReplicaCounts::default(),
            })
            .await
            .unwrap();

        let stray = Orphan {
            namespace: "dy-stray".into(),
            deployment: "hand-made".into(),
        };
        assert_eq!(f.detector.find_orphans().await.unwrap(), vec![stray.clone()]);

        let dry = f.detector.cleanup(&stray, false).await.unwrap();
        assert!(dry.confirmation_required);
        assert!(f.sim.has_deployment("dy-stray", "hand-made"));

        let done = f.detector.cleanup(&stray, true).await.unwrap();
        assert!(done.errors.is_empty());
        assert_eq!(done.deleted, vec!["deployment/hand-made".to_string()]);
        assert!(!f.sim.has_deployment("dy-stray", "hand-made"));
        assert!(f.sim.has_deployment(&kept.refs.namespace, &kept.refs.deployment));
        assert!(f.detector.find_orphans().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleanup_accumulates_errors() {
        let f = fixture().await;
        let lost = provision(&f, "bob").await;
        forget(&f, &lost);
        f.sim.fail_on(ObjectKind::Service, &lost.refs.service);

        let orphan = Orphan {
            namespace: lost.refs.namespace.clone(),
            deployment: lost.refs.deployment.clone(),
        };
        let result = f.detector.cleanup(&orphan, true).await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("service/"));
        // The deployment is still removed after the service failure.
        assert_eq!(result.deleted.len(), 2);
    }

    #[tokio::test]
    async fn cleanup_refuses_reclaimed_deployments() {
        let f = fixture().await;
        let inst = provision(&f, "alice").await;
        let target = Orphan {
            namespace: inst.refs.namespace.clone(),
            deployment: inst.refs.deployment.clone(),
        };
        let result = f.detector.cleanup(&target, true).await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(f.sim.has_deployment(&target.namespace, &target.deployment));
    }

    #[tokio::test]
    async fn unlabeled_namespaces_fall_back_to_prefix() {
        let f = fixture().await;
        f.sim
            .create_namespace(&NamespaceObject {
                name: "dy-legacy".into(),
                labels: Labels::new(),
            })
            .await
            .unwrap();
        f.sim
            .create_namespace(&NamespaceObject {
                name: "kube-system".into(),
                labels: Labels::new(),
            })
            .await
            .unwrap();
        let names = f.detector.managed_namespaces().await.unwrap();
        assert_eq!(names, vec!["dy-legacy".to_string()]);
    }
}
