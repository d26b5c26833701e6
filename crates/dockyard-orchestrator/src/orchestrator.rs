//! Resource orchestrator: turns a subscription into platform objects.
//!
//! `provision` walks namespace → deployment → service → ingress, reading
//! each object by its deterministic name first and creating it only when
//! absent. `teardown` walks the same chain in reverse. Both are safe to
//! re-run after a partial failure.

use tracing::{debug, info, warn};

use dockyard_core::{PlatformConfig, SharedClock};
use dockyard_platform::{
    DeploymentObject, IngressObject, NamespaceObject, Platform, PlatformResult, ServiceObject,
};
use dockyard_state::*;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::manifest::{
    ManifestParams, ResourceOverrides, TemplateContext, build_manifests, external_host,
    internal_url, render_env, validate_resources,
};
use crate::naming::{ResourceNames, ingress_name, pod_selector};

/// Naming and ingress settings, usually taken from `[platform]`.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub namespace_prefix: String,
    pub managed_by: String,
    pub ingress_domain: String,
    pub ingress_class: Option<String>,
    pub tls: bool,
}

impl From<&PlatformConfig> for OrchestratorSettings {
    fn from(config: &PlatformConfig) -> Self {
        Self {
            namespace_prefix: config.namespace_prefix.clone(),
            managed_by: config.managed_by.clone(),
            ingress_domain: config.ingress_domain.clone(),
            ingress_class: config.ingress_class.clone(),
            tls: config.tls,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&PlatformConfig::default())
    }
}

/// Whether an ensure step created the object or found it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    Existing,
}

/// Outcome of a provision call.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub instance: ServiceInstance,
    /// Objects created by this call, as `kind/namespace/name`.
    pub created: Vec<String>,
    /// Objects that already existed and were reused.
    pub existing: Vec<String>,
    /// Set when ingress creation failed; the instance is internal-only.
    pub ingress_error: Option<String>,
    /// Whether a new instance record (and quota slot) was taken.
    pub new_record: bool,
}

/// Outcome of a teardown call.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    pub instance_id: String,
    pub deleted: Vec<String>,
    pub already_gone: Vec<String>,
    /// The namespace still hosts another live instance.
    pub namespace_retained: bool,
}

#[derive(Debug, Clone)]
pub struct PodLogs {
    pub pod: String,
    pub logs: String,
}

/// Provisions and tears down the platform objects behind instances.
#[derive(Clone)]
pub struct ResourceOrchestrator {
    state: StateStore,
    platform: Platform,
    clock: SharedClock,
    settings: OrchestratorSettings,
}

fn record(list: &mut Vec<String>, kind: &str, namespace: &str, name: &str) {
    list.push(format!("{kind}/{namespace}/{name}"));
}

/// Fold a create result into an [`Ensured`], treating a racing create as reuse.
fn settle_create(result: PlatformResult<()>) -> PlatformResult<Ensured> {
    match result {
        Ok(()) => Ok(Ensured::Created),
        Err(e) if e.is_already_exists() => Ok(Ensured::Existing),
        Err(e) => Err(e),
    }
}

/// Fold a delete result: `Ok(true)` deleted, `Ok(false)` already gone.
fn settle_delete(result: PlatformResult<()>) -> PlatformResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

impl ResourceOrchestrator {
    pub fn new(
        state: StateStore,
        platform: Platform,
        clock: SharedClock,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            state,
            platform,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Deterministic names for a (service, user) pair.
    pub fn names_for(&self, service_slug: &str, user_id: &str) -> ResourceNames {
        ResourceNames::new(&self.settings.namespace_prefix, service_slug, user_id)
    }

    /// Provision (or converge) the objects backing a subscription.
    ///
    /// Re-running after a partial failure reuses whatever already exists and
    /// the existing live instance record; a quota slot is only taken when a
    /// new record is created.
    pub async fn provision(
        &self,
        subscription_id: &str,
        overrides: Option<&ResourceOverrides>,
    ) -> OrchestratorResult<ProvisionReport> {
        let sub = self
            .state
            .get_subscription(subscription_id)?
            .ok_or_else(|| OrchestratorError::SubscriptionNotFound(subscription_id.to_string()))?;
        if !sub.status.wants_instance() {
            return Err(OrchestratorError::NotProvisionable {
                id: sub.id,
                status: sub.status,
            });
        }
        let entry = self
            .state
            .get_catalog_entry(&sub.service_id)?
            .ok_or_else(|| OrchestratorError::ServiceNotFound(sub.service_id.clone()))?;
        let existing = self.state.find_live_instance_for_subscription(&sub.id)?;
        if existing.is_none() && !entry.has_capacity() {
            return Err(OrchestratorError::QuotaExceeded(entry.id));
        }

        let names = self.names_for(&entry.slug, &sub.user_id);
        let host = external_host(&sub.subdomain, &self.settings.ingress_domain);
        let scheme = if self.settings.tls { "https" } else { "http" };
        let external_url = format!("{scheme}://{host}");
        let internal = internal_url(&names);
        let resources = match overrides {
            Some(o) => o.apply(&entry.resources),
            None => entry.resources.clone(),
        };
        validate_resources(&resources)?;

        // Render before any platform call: a bad template must not leave
        // half-built resources behind.
        let env = render_env(
            &entry.env,
            &TemplateContext {
                subdomain: sub.subdomain.clone(),
                external_url: external_url.clone(),
                internal_url: internal.clone(),
                namespace: names.namespace.clone(),
                user_id: sub.user_id.clone(),
                subscription_id: sub.id.clone(),
            },
        )?;
        let manifests = build_manifests(
            &names,
            &sub,
            &entry,
            ManifestParams {
                managed_by: &self.settings.managed_by,
                ingress_class: self.settings.ingress_class.as_deref(),
                tls: self.settings.tls,
                host,
                resources: resources.clone(),
                env,
            },
        );

        let mut created = Vec::new();
        let mut reused = Vec::new();
        let mut track = |ensured: Ensured, kind: &str, name: &str| {
            let list = match ensured {
                Ensured::Created => &mut created,
                Ensured::Existing => &mut reused,
            };
            record(list, kind, &names.namespace, name);
        };

        let ensured = self.ensure_namespace(&manifests.namespace).await?;
        track(ensured, "namespace", &names.namespace);
        let ensured = self.ensure_deployment(&manifests.deployment).await?;
        track(ensured, "deployment", &names.deployment);
        let ensured = self.ensure_service(&manifests.service).await?;
        track(ensured, "service", &names.service);

        let ingress_error = match self.ensure_ingress(&manifests.ingress).await {
            Ok(ensured) => {
                track(ensured, "ingress", &names.ingress);
                None
            }
            Err(e) => {
                warn!(
                    subscription_id = %sub.id,
                    ingress = %names.ingress,
                    error = %e,
                    "ingress creation failed, instance reachable internally only"
                );
                Some(e.to_string())
            }
        };

        let refs = PlatformResourceRefs {
            namespace: names.namespace.clone(),
            deployment: names.deployment.clone(),
            service: names.service.clone(),
            ingress: ingress_error.is_none().then(|| names.ingress.clone()),
        };
        let external = ingress_error.is_none().then_some(external_url);
        let replicas = manifests.deployment.replicas;
        let now = self.clock.now();

        let (instance, new_record) = match existing {
            Some(existing) => {
                let updated = self
                    .state
                    .update_instance(&existing.id, |i| {
                        i.refs = refs;
                        i.internal_url = internal;
                        i.external_url = external;
                        i.resources = resources;
                        i.desired_replicas = replicas;
                        i.updated_at = now;
                    })?
                    .ok_or_else(|| OrchestratorError::InstanceNotFound(existing.id.clone()))?;
                (updated, false)
            }
            None => {
                let mut instance =
                    ServiceInstance::new(&sub, refs, internal, resources, replicas, now);
                instance.external_url = external;
                self.state.put_instance(&instance)?;
                self.state
                    .update_catalog_entry(&entry.id, |c| c.in_use += 1)?;
                (instance, true)
            }
        };

        let instance_id = instance.id.clone();
        self.state.update_subscription(&sub.id, move |s| {
            s.instance_id = Some(instance_id);
            if s.status == SubscriptionStatus::PendingDeployment {
                s.status = SubscriptionStatus::Active;
            }
            s.updated_at = now;
        })?;

        info!(
            subscription_id = %sub.id,
            instance_id = %instance.id,
            namespace = %names.namespace,
            deployment = %names.deployment,
            created = created.len(),
            reused = reused.len(),
            new_record,
            "instance provisioned"
        );

        Ok(ProvisionReport {
            instance,
            created,
            existing: reused,
            ingress_error,
            new_record,
        })
    }

    async fn ensure_namespace(&self, ns: &NamespaceObject) -> OrchestratorResult<Ensured> {
        if self.platform.get_namespace(&ns.name).await?.is_some() {
            return Ok(Ensured::Existing);
        }
        Ok(settle_create(self.platform.create_namespace(ns).await)?)
    }

    async fn ensure_deployment(&self, d: &DeploymentObject) -> OrchestratorResult<Ensured> {
        if self.platform.get_deployment(&d.namespace, &d.name).await?.is_some() {
            return Ok(Ensured::Existing);
        }
        Ok(settle_create(self.platform.create_deployment(d).await)?)
    }

    async fn ensure_service(&self, s: &ServiceObject) -> OrchestratorResult<Ensured> {
        if self.platform.get_service(&s.namespace, &s.name).await?.is_some() {
            return Ok(Ensured::Existing);
        }
        Ok(settle_create(self.platform.create_service(s).await)?)
    }

    async fn ensure_ingress(&self, i: &IngressObject) -> OrchestratorResult<Ensured> {
        if self.platform.get_ingress(&i.namespace, &i.name).await?.is_some() {
            return Ok(Ensured::Existing);
        }
        Ok(settle_create(self.platform.create_ingress(i).await)?)
    }

    /// Delete an instance's objects in reverse creation order and mark it DELETED.
    ///
    /// Missing objects count as success. The namespace is kept while any
    /// other live instance still lives in it. A transient platform failure
    /// aborts the call with the record untouched, so a retry resumes.
    pub async fn teardown(&self, instance_id: &str) -> OrchestratorResult<TeardownReport> {
        let inst = self
            .state
            .get_instance(instance_id)?
            .ok_or_else(|| OrchestratorError::InstanceNotFound(instance_id.to_string()))?;
        let mut report = TeardownReport {
            instance_id: inst.id.clone(),
            ..Default::default()
        };
        if inst.status == PodStatus::Deleted {
            debug!(%instance_id, "teardown of already-deleted instance");
            return Ok(report);
        }

        let refs = &inst.refs;
        let ns = refs.namespace.as_str();
        // The ingress may exist even when the record lost track of it.
        let ingress = refs
            .ingress
            .clone()
            .unwrap_or_else(|| ingress_name(&refs.deployment));

        let gone = settle_delete(self.platform.delete_ingress(ns, &ingress).await)?;
        self.tally(&mut report, gone, "ingress", ns, &ingress);
        let gone = settle_delete(self.platform.delete_service(ns, &refs.service).await)?;
        self.tally(&mut report, gone, "service", ns, &refs.service);
        let gone = settle_delete(self.platform.delete_deployment(ns, &refs.deployment).await)?;
        self.tally(&mut report, gone, "deployment", ns, &refs.deployment);

        if self.state.count_live_instances_in_namespace(ns, &inst.id)? == 0 {
            let gone = settle_delete(self.platform.delete_namespace(ns).await)?;
            self.tally(&mut report, gone, "namespace", ns, ns);
        } else {
            report.namespace_retained = true;
        }

        let now = self.clock.now();
        self.state.update_instance(&inst.id, |i| {
            i.status = PodStatus::Deleted;
            i.status_message = Some("resources removed".to_string());
            i.ready_replicas = 0;
            i.available_replicas = 0;
            i.deleted_at = Some(now);
            i.updated_at = now;
        })?;

        info!(
            %instance_id,
            namespace = %ns,
            deleted = report.deleted.len(),
            already_gone = report.already_gone.len(),
            namespace_retained = report.namespace_retained,
            "instance torn down"
        );
        Ok(report)
    }

    fn tally(&self, report: &mut TeardownReport, deleted: bool, kind: &str, ns: &str, name: &str) {
        if deleted {
            record(&mut report.deleted, kind, ns, name);
        } else {
            record(&mut report.already_gone, kind, ns, name);
        }
    }

    fn live_instance(&self, instance_id: &str) -> OrchestratorResult<ServiceInstance> {
        let inst = self
            .state
            .get_instance(instance_id)?
            .ok_or_else(|| OrchestratorError::InstanceNotFound(instance_id.to_string()))?;
        if inst.status == PodStatus::Deleted {
            return Err(OrchestratorError::InstanceDeleted(inst.id));
        }
        Ok(inst)
    }

    /// Rolling restart of an instance's pods.
    pub async fn restart(&self, instance_id: &str) -> OrchestratorResult<()> {
        let inst = self.live_instance(instance_id)?;
        let now = self.clock.now();
        self.platform
            .restart_deployment(&inst.refs.namespace, &inst.refs.deployment, now)
            .await?;
        self.state.update_instance(&inst.id, |i| {
            i.status_message = Some("restart requested".to_string());
            i.updated_at = now;
        })?;
        info!(%instance_id, deployment = %inst.refs.deployment, "rollout restart requested");
        Ok(())
    }

    /// Scale to zero while keeping every object in place.
    pub async fn suspend(&self, instance_id: &str) -> OrchestratorResult<()> {
        let inst = self.live_instance(instance_id)?;
        self.platform
            .scale_deployment(&inst.refs.namespace, &inst.refs.deployment, 0)
            .await?;
        let now = self.clock.now();
        self.state.update_instance(&inst.id, |i| {
            i.desired_replicas = 0;
            i.status = PodStatus::Stopped;
            i.status_message = Some("suspended".to_string());
            i.updated_at = now;
        })?;
        info!(%instance_id, "instance suspended");
        Ok(())
    }

    /// Scale a suspended instance back to its catalog replica count.
    pub async fn resume(&self, instance_id: &str) -> OrchestratorResult<()> {
        let inst = self.live_instance(instance_id)?;
        let replicas = self
            .state
            .get_catalog_entry(&inst.service_id)?
            .map(|e| e.replicas.max(1))
            .unwrap_or(1);
        self.platform
            .scale_deployment(&inst.refs.namespace, &inst.refs.deployment, replicas)
            .await?;
        let now = self.clock.now();
        self.state.update_instance(&inst.id, |i| {
            i.desired_replicas = replicas;
            i.status = PodStatus::Pending;
            i.status_message = Some("resumed".to_string());
            i.updated_at = now;
        })?;
        info!(%instance_id, replicas, "instance resumed");
        Ok(())
    }

    /// Recent log output of every pod behind an instance.
    pub async fn pod_logs(
        &self,
        instance_id: &str,
        tail_lines: Option<i64>,
    ) -> OrchestratorResult<Vec<PodLogs>> {
        let inst = self.live_instance(instance_id)?;
        let ns = &inst.refs.namespace;
        let pods = self
            .platform
            .list_pods(ns, &pod_selector(&inst.refs.deployment))
            .await?;
        let mut out = Vec::with_capacity(pods.len());
        for pod in pods {
            let logs = self.platform.pod_logs(ns, &pod.name, tail_lines).await?;
            out.push(PodLogs {
                pod: pod.name,
                logs,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{DateTime, TimeDelta, Utc};
    use dockyard_core::ManualClock;
    use dockyard_platform::{ObjectKind, PlatformClient, SimulatedPlatform};

    use crate::manifest::ManifestError;

    struct Fixture {
        state: StateStore,
        sim: Arc<SimulatedPlatform>,
        orch: ResourceOrchestrator,
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn catalog_entry(quota: Option<u32>) -> CatalogEntry {
        CatalogEntry {
            id: "svc-ghost".into(),
            slug: "ghost".into(),
            display_name: "Ghost".into(),
            image: "ghost:5-alpine".into(),
            container_port: 2368,
            replicas: 1,
            resources: ResourceSpec {
                cpu_request: "100m".into(),
                cpu_limit: "500m".into(),
                memory_request: "256Mi".into(),
                memory_limit: "512Mi".into(),
            },
            env: BTreeMap::from([("url".to_string(), "{{ external_url }}".to_string())]),
            quota,
            in_use: 0,
        }
    }

    async fn fixture(quota: Option<u32>) -> Fixture {
        let state = StateStore::open_in_memory().unwrap();
        state.put_catalog_entry(&catalog_entry(quota)).unwrap();
        let sim = Arc::new(SimulatedPlatform::new());
        let platform = Platform::connect(sim.clone()).await;
        let clock: SharedClock = Arc::new(ManualClock::new(t0()));
        let orch = ResourceOrchestrator::new(
            state.clone(),
            platform,
            clock,
            OrchestratorSettings::default(),
        );
        Fixture { state, sim, orch }
    }

    fn subscribe(state: &StateStore, user: &str) -> Subscription {
        let sub = Subscription::new(user, "svc-ghost", "myblog", t0() + TimeDelta::days(30), t0());
        state.put_subscription(&sub).unwrap();
        sub
    }

    #[tokio::test]
    async fn provision_creates_everything_in_order() {
        let f = fixture(None).await;
        let sub = subscribe(&f.state, "user-1");

        let report = f.orch.provision(&sub.id, None).await.unwrap();

        assert!(report.new_record);
        assert_eq!(report.created.len(), 4);
        assert!(report.ingress_error.is_none());
        let calls = f.sim.calls();
        let kinds: Vec<&str> = calls.iter().map(|c| c.split(' ').nth(1).unwrap()).collect();
        assert_eq!(kinds, ["namespace", "deployment", "service", "ingress"]);

        let inst = report.instance;
        assert_eq!(inst.status, PodStatus::Pending);
        assert_eq!(inst.external_url.as_deref(), Some("https://myblog.apps.local"));
        let d = f.sim.deployment(&inst.refs.namespace, &inst.refs.deployment).unwrap();
        assert_eq!(d.env["url"], "https://myblog.apps.local");
        assert_eq!(d.labels["dockyard.io/managed-by"], "dockyard");

        let stored = f.state.get_subscription(&sub.id).unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(stored.instance_id, Some(inst.id));
        assert_eq!(f.state.get_catalog_entry("svc-ghost").unwrap().unwrap().in_use, 1);
    }

    #[tokio::test]
    async fn provision_twice_is_idempotent() {
        let f = fixture(Some(5)).await;
        let sub = subscribe(&f.state, "user-1");

        let first = f.orch.provision(&sub.id, None).await.unwrap();
        let objects = f.sim.object_count();
        let second = f.orch.provision(&sub.id, None).await.unwrap();

        assert_eq!(f.sim.object_count(), objects);
        assert_eq!(second.instance.id, first.instance.id);
        assert!(!second.new_record);
        assert!(second.created.is_empty());
        assert_eq!(second.existing.len(), 4);
        assert_eq!(f.state.list_live_instances().unwrap().len(), 1);
        assert_eq!(f.state.get_catalog_entry("svc-ghost").unwrap().unwrap().in_use, 1);
    }

    #[tokio::test]
    async fn ingress_failure_is_non_fatal() {
        let f = fixture(None).await;
        let sub = subscribe(&f.state, "user-1");
        let names = f.orch.names_for("ghost", "user-1");
        f.sim.fail_on(ObjectKind::Ingress, &names.ingress);

        let report = f.orch.provision(&sub.id, None).await.unwrap();

        assert!(report.ingress_error.is_some());
        assert!(report.instance.refs.ingress.is_none());
        assert!(report.instance.external_url.is_none());
        assert!(f.sim.has_deployment(&names.namespace, &names.deployment));
        assert!(f.sim.has_service(&names.namespace, &names.service));
    }

    #[tokio::test]
    async fn bad_template_fails_before_platform_calls() {
        let f = fixture(None).await;
        let mut entry = catalog_entry(None);
        entry.env.insert("db".into(), "{{ database_url }}".into());
        f.state.put_catalog_entry(&entry).unwrap();
        let sub = subscribe(&f.state, "user-1");

        let err = f.orch.provision(&sub.id, None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Manifest(_)));
        assert!(f.sim.calls().is_empty());
        assert!(f.state.list_instances().unwrap().is_empty());
    }

    #[tokio::test]
    async fn overflowing_override_fails_before_platform_calls() {
        let f = fixture(None).await;
        let sub = subscribe(&f.state, "user-1");
        let overrides = ResourceOverrides {
            memory_limit: Some("99999999999999Ti".into()),
            ..Default::default()
        };

        let err = f.orch.provision(&sub.id, Some(&overrides)).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Manifest(ManifestError::InvalidQuantity { field: "memory_limit", .. })
        ));
        assert!(f.sim.calls().is_empty());
    }

    #[tokio::test]
    async fn quota_blocks_new_instances_only() {
        let f = fixture(Some(1)).await;
        let a = subscribe(&f.state, "user-1");
        let b = subscribe(&f.state, "user-2");

        f.orch.provision(&a.id, None).await.unwrap();
        let err = f.orch.provision(&b.id, None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::QuotaExceeded(_)));
        // Re-provisioning the holder still converges.
        f.orch.provision(&a.id, None).await.unwrap();
    }

    #[tokio::test]
    async fn ended_subscription_is_not_provisionable() {
        let f = fixture(None).await;
        let sub = subscribe(&f.state, "user-1");
        f.state
            .update_subscription(&sub.id, |s| s.status = SubscriptionStatus::Expired)
            .unwrap();
        let err = f.orch.provision(&sub.id, None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotProvisionable { .. }));
    }

    #[tokio::test]
    async fn teardown_reverses_and_keeps_shared_namespace() {
        let f = fixture(None).await;
        let mut n8n = catalog_entry(None);
        n8n.id = "svc-n8n".into();
        n8n.slug = "n8n".into();
        f.state.put_catalog_entry(&n8n).unwrap();

        let ghost_sub = subscribe(&f.state, "user-1");
        let mut n8n_sub = Subscription::new("user-1", "svc-n8n", "flows", t0(), t0());
        n8n_sub.status = SubscriptionStatus::Active;
        f.state.put_subscription(&n8n_sub).unwrap();

        let ghost = f.orch.provision(&ghost_sub.id, None).await.unwrap().instance;
        let flows = f.orch.provision(&n8n_sub.id, None).await.unwrap().instance;
        assert_eq!(ghost.refs.namespace, flows.refs.namespace);

        let report = f.orch.teardown(&ghost.id).await.unwrap();
        assert!(report.namespace_retained);
        assert_eq!(report.deleted.len(), 3);
        assert!(report.deleted[0].starts_with("ingress/"));
        assert!(report.deleted[2].starts_with("deployment/"));
        assert!(f.sim.has_namespace(&ghost.refs.namespace));
        assert_eq!(
            f.state.get_instance(&ghost.id).unwrap().unwrap().status,
            PodStatus::Deleted
        );

        let report = f.orch.teardown(&flows.id).await.unwrap();
        assert!(!report.namespace_retained);
        assert!(!f.sim.has_namespace(&flows.refs.namespace));
        assert_eq!(f.sim.object_count(), 0);
    }

    #[tokio::test]
    async fn teardown_tolerates_missing_objects() {
        let f = fixture(None).await;
        let sub = subscribe(&f.state, "user-1");
        let inst = f.orch.provision(&sub.id, None).await.unwrap().instance;
        f.sim
            .delete_service(&inst.refs.namespace, &inst.refs.service)
            .await
            .unwrap();

        let report = f.orch.teardown(&inst.id).await.unwrap();
        assert_eq!(report.already_gone.len(), 1);
        assert!(report.already_gone[0].starts_with("service/"));

        // Second teardown is a no-op.
        let again = f.orch.teardown(&inst.id).await.unwrap();
        assert!(again.deleted.is_empty());
    }

    #[tokio::test]
    async fn teardown_aborts_on_transient_failure() {
        let f = fixture(None).await;
        let sub = subscribe(&f.state, "user-1");
        let inst = f.orch.provision(&sub.id, None).await.unwrap().instance;
        f.sim.set_reachable(false);

        assert!(f.orch.teardown(&inst.id).await.is_err());
        assert_eq!(
            f.state.get_instance(&inst.id).unwrap().unwrap().status,
            PodStatus::Pending
        );
    }

    #[tokio::test]
    async fn suspend_resume_and_restart() {
        let f = fixture(None).await;
        let sub = subscribe(&f.state, "user-1");
        let inst = f.orch.provision(&sub.id, None).await.unwrap().instance;

        f.orch.suspend(&inst.id).await.unwrap();
        let d = f.sim.deployment(&inst.refs.namespace, &inst.refs.deployment).unwrap();
        assert_eq!(d.replicas, 0);
        assert_eq!(
            f.state.get_instance(&inst.id).unwrap().unwrap().status,
            PodStatus::Stopped
        );

        f.orch.resume(&inst.id).await.unwrap();
        let d = f.sim.deployment(&inst.refs.namespace, &inst.refs.deployment).unwrap();
        assert_eq!(d.replicas, 1);

        f.orch.restart(&inst.id).await.unwrap();
        assert_eq!(f.sim.rollout_restarts(&inst.refs.namespace, &inst.refs.deployment), 1);
    }

    #[tokio::test]
    async fn logs_are_collected_per_pod() {
        let f = fixture(None).await;
        let sub = subscribe(&f.state, "user-1");
        let inst = f.orch.provision(&sub.id, None).await.unwrap().instance;
        f.sim.set_logs(&inst.refs.namespace, &inst.refs.deployment, "booted\nlistening");

        let logs = f.orch.pod_logs(&inst.id, Some(1)).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].logs, "listening");
    }
}
