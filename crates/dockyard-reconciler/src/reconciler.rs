//! Status reconciler: keeps persisted instance status in step with the
//! platform.
//!
//! The periodic sweep is the only place that announces an instance
//! becoming ready. The announcement is tied to the persisted transition
//! into RUNNING, detected inside the update transaction, so it fires once
//! per recovery no matter how often the sweep runs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use dockyard_core::SharedClock;
use dockyard_orchestrator::naming::pod_selector;
use dockyard_platform::{Platform, PodObject, ReplicaCounts};
use dockyard_queue::{JobQueue, Notification, NotificationKind};
use dockyard_state::{PodStatus, ServiceInstance, StateStore};

use crate::error::{ReconcileError, ReconcileResult};
use crate::status::{Observation, derive_status, status_message};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplicaSummary {
    pub desired: u32,
    pub ready: u32,
    pub available: u32,
}

impl From<ReplicaCounts> for ReplicaSummary {
    fn from(c: ReplicaCounts) -> Self {
        Self {
            desired: c.desired,
            ready: c.ready,
            available: c.available,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodDetail {
    pub name: String,
    pub phase: String,
    pub ready: bool,
    pub restart_count: u32,
    pub node: Option<String>,
    pub message: Option<String>,
}

impl From<PodObject> for PodDetail {
    fn from(p: PodObject) -> Self {
        Self {
            name: p.name,
            phase: p.phase,
            ready: p.ready,
            restart_count: p.restart_count,
            node: p.node_name,
            message: p.message,
        }
    }
}

/// Freshly resolved status of one instance. Nothing is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub instance_id: String,
    pub status: PodStatus,
    pub message: String,
    pub replicas: ReplicaSummary,
    pub pods: Vec<PodDetail>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one sweep over live instances.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Instances whose persisted status just became RUNNING.
    pub became_ready: Vec<String>,
    pub errors: Vec<(String, String)>,
    /// The control plane was unreachable; nothing was persisted.
    pub degraded: bool,
}

#[derive(Clone)]
pub struct StatusReconciler {
    state: StateStore,
    platform: Platform,
    queue: JobQueue,
    clock: SharedClock,
}

impl StatusReconciler {
    pub fn new(state: StateStore, platform: Platform, queue: JobQueue, clock: SharedClock) -> Self {
        Self {
            state,
            platform,
            queue,
            clock,
        }
    }

    /// Observe the platform for one instance and derive its status.
    pub async fn resolve_status(&self, instance_id: &str) -> ReconcileResult<StatusReport> {
        let inst = self
            .state
            .get_instance(instance_id)?
            .ok_or_else(|| ReconcileError::InstanceNotFound(instance_id.to_string()))?;
        self.resolve(&inst).await
    }

    async fn resolve(&self, inst: &ServiceInstance) -> ReconcileResult<StatusReport> {
        let timestamp = self.clock.now();
        let mut report = StatusReport {
            instance_id: inst.id.clone(),
            status: inst.status,
            message: String::new(),
            replicas: ReplicaSummary::default(),
            pods: Vec::new(),
            timestamp,
        };
        if inst.status == PodStatus::Deleted {
            report.message = "deleted".to_string();
            return Ok(report);
        }

        let refs = &inst.refs;
        let observation = if refs.deployment.is_empty() {
            Observation::Missing
        } else {
            match self.platform.get_deployment(&refs.namespace, &refs.deployment).await {
                Ok(Some(d)) => Observation::Replicas(d.status),
                Ok(None) => Observation::Missing,
                Err(e) if e.is_connectivity() => Observation::Unreachable,
                Err(e) => return Err(e.into()),
            }
        };

        report.status = derive_status(observation);
        if let Observation::Replicas(counts) = observation {
            report.replicas = counts.into();
            report.message = status_message(report.status, Some(counts));
            match self
                .platform
                .list_pods(&refs.namespace, &pod_selector(&refs.deployment))
                .await
            {
                Ok(pods) => report.pods = pods.into_iter().map(PodDetail::from).collect(),
                Err(e) => debug!(instance_id = %inst.id, error = %e, "pod listing failed"),
            }
        } else {
            report.message = status_message(report.status, None);
        }
        Ok(report)
    }

    /// Resolve every live instance and persist drift.
    pub async fn sweep(&self) -> ReconcileResult<SweepReport> {
        let mut report = SweepReport::default();
        if !self.platform.check_connectivity().await {
            warn!("control plane unreachable, status sweep skipped");
            report.degraded = true;
            return Ok(report);
        }

        let instances = self.state.list_live_instances()?;
        for inst in instances {
            report.checked += 1;
            let resolved = match self.resolve(&inst).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(instance_id = %inst.id, error = %e, "status resolution failed");
                    report.errors.push((inst.id.clone(), e.to_string()));
                    continue;
                }
            };
            if resolved.status == PodStatus::Error {
                // Lost the control plane mid-sweep; persist nothing further.
                report.degraded = true;
                break;
            }
            match self.apply(&inst, &resolved) {
                Ok(Applied::Unchanged) => report.unchanged += 1,
                Ok(Applied::Updated { became_ready }) => {
                    report.updated += 1;
                    if became_ready {
                        self.announce_ready(&inst);
                        report.became_ready.push(inst.id.clone());
                    }
                }
                Ok(Applied::Gone) => {}
                Err(e) => {
                    error!(instance_id = %inst.id, error = %e, "status update failed");
                    report.errors.push((inst.id.clone(), e.to_string()));
                }
            }
        }

        if report.updated > 0 || !report.errors.is_empty() || report.degraded {
            info!(
                checked = report.checked,
                updated = report.updated,
                became_ready = report.became_ready.len(),
                errors = report.errors.len(),
                degraded = report.degraded,
                "status sweep complete"
            );
        } else {
            debug!(checked = report.checked, "status sweep complete, no drift");
        }
        Ok(report)
    }

    /// Write the resolved status if it differs from what is stored.
    fn apply(&self, seen: &ServiceInstance, resolved: &StatusReport) -> ReconcileResult<Applied> {
        let r = resolved.replicas;
        let drifted = seen.status != resolved.status
            || seen.ready_replicas != r.ready
            || seen.available_replicas != r.available;
        if !drifted {
            return Ok(Applied::Unchanged);
        }

        let now = resolved.timestamp;
        let mut outcome = Applied::Gone;
        self.state.update_instance(&seen.id, |i| {
            if i.status == PodStatus::Deleted {
                return;
            }
            let previous = i.status;
            let next = resolved.status;
            i.status = next;
            i.status_message = Some(resolved.message.clone());
            i.ready_replicas = r.ready;
            i.available_replicas = r.available;
            if next.is_unhealthy() {
                i.failed_since.get_or_insert(now);
            } else if next == PodStatus::Running {
                i.failed_since = None;
            }
            i.last_status_sync = Some(now);
            i.updated_at = now;
            if previous != next {
                debug!(instance_id = %i.id, from = %previous, to = %next, "instance status changed");
            }
            outcome = Applied::Updated {
                became_ready: previous != PodStatus::Running && next == PodStatus::Running,
            };
        })?;
        Ok(outcome)
    }

    fn announce_ready(&self, inst: &ServiceInstance) {
        info!(instance_id = %inst.id, user_id = %inst.user_id, "instance is ready");
        let detail = serde_json::json!({
            "internal_url": inst.internal_url,
            "external_url": inst.external_url,
        });
        self.queue.notify(
            Notification::new(NotificationKind::PodReady, &inst.user_id)
                .for_subscription(&inst.subscription_id)
                .for_instance(&inst.id)
                .with_detail(detail),
        );
    }

    /// Sweep on a fixed interval until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?interval, "status reconciler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "status sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("status reconciler shutting down");
                    break;
                }
            }
        }
    }
}

enum Applied {
    Unchanged,
    Updated { became_ready: bool },
    /// Deleted between the read and the update.
    Gone,
}
