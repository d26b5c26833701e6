//! Pod coordinator: creation with retry, health sweeps, remediation, and
//! cleanup of long-failed instances.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use dockyard_core::{SharedClock, to_delta};
use dockyard_orchestrator::{OrchestratorError, ResourceOrchestrator, TeardownReport};
use dockyard_queue::{JobOptions, JobQueue, Lane, Notification, NotificationKind};
use dockyard_reconciler::StatusReconciler;
use dockyard_state::{PodStatus, ServiceInstance, StateStore};

use crate::error::{LifecycleError, LifecycleResult};
use crate::jobs::{self, CreatePod, InstanceRef, remediation_job_id};
use crate::timings::LifecycleTimings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CreateOutcome {
    Provisioned { instance_id: String },
    /// A live instance already exists; nothing was created.
    AlreadyLive { instance_id: String },
    /// The subscription no longer wants an instance.
    Skipped { reason: String },
    RetryScheduled { next_attempt: u32, delay: Duration },
    /// Every attempt failed; the owner was notified.
    Exhausted { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemediationOutcome {
    /// The instance was healthy on re-check.
    NotNeeded { status: PodStatus },
    Skipped { reason: String },
    /// Shutdown arrived during the settle wait.
    Interrupted,
    Restarted { status: PodStatus },
}

/// Result of one health sweep. `healthy + unhealthy + errors.len() == checked`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PodHealthReport {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub errors: Vec<(String, String)>,
    pub remediation_queued: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FailedCleanupReport {
    pub deleted: Vec<String>,
    pub remediation_queued: Vec<String>,
    pub errors: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct PodCoordinator {
    state: StateStore,
    orchestrator: ResourceOrchestrator,
    reconciler: StatusReconciler,
    queue: JobQueue,
    clock: SharedClock,
    timings: LifecycleTimings,
    shutdown: Option<watch::Receiver<bool>>,
}

impl PodCoordinator {
    pub fn new(
        state: StateStore,
        orchestrator: ResourceOrchestrator,
        reconciler: StatusReconciler,
        queue: JobQueue,
        clock: SharedClock,
        timings: LifecycleTimings,
    ) -> Self {
        Self {
            state,
            orchestrator,
            reconciler,
            queue,
            clock,
            timings,
            shutdown: None,
        }
    }

    /// Cut remediation settle waits short when `shutdown` flips.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    // ── Creation ───────────────────────────────────────────────────

    /// One create attempt. Failure schedules the next attempt after
    /// `2^attempt` minutes until the attempt ceiling. A retry the queue
    /// refuses ends the attempts like the ceiling does.
    pub async fn create_pod(&self, job: &CreatePod) -> LifecycleResult<CreateOutcome> {
        let sub_id = job.subscription_id.as_str();
        if let Some(existing) = self.state.find_live_instance_for_subscription(sub_id)? {
            debug!(subscription_id = %sub_id, instance_id = %existing.id, "instance already live");
            return Ok(CreateOutcome::AlreadyLive {
                instance_id: existing.id,
            });
        }

        let mut error = match self.orchestrator.provision(sub_id, None).await {
            Ok(report) => {
                info!(
                    subscription_id = %sub_id,
                    instance_id = %report.instance.id,
                    attempt = job.attempt,
                    "instance created"
                );
                return Ok(CreateOutcome::Provisioned {
                    instance_id: report.instance.id,
                });
            }
            Err(e @ OrchestratorError::SubscriptionNotFound(_))
            | Err(e @ OrchestratorError::NotProvisionable { .. }) => {
                info!(subscription_id = %sub_id, reason = %e, "create skipped");
                return Ok(CreateOutcome::Skipped {
                    reason: e.to_string(),
                });
            }
            Err(e) => e.to_string(),
        };

        if job.attempt < self.timings.recreate_max_attempts {
            let next = CreatePod {
                subscription_id: job.subscription_id.clone(),
                attempt: job.attempt + 1,
            };
            let delay = LifecycleTimings::recreate_delay(job.attempt);
            let queued = self.queue.try_enqueue(
                Lane::Pod,
                jobs::CREATE_POD,
                serde_json::to_value(&next).unwrap_or_default(),
                JobOptions::default()
                    .with_job_id(next.job_id())
                    .with_delay(delay)
                    .with_max_attempts(1),
            );
            match queued {
                Ok(_) => {
                    warn!(
                        subscription_id = %sub_id,
                        attempt = job.attempt,
                        retry_in = ?delay,
                        %error,
                        "instance creation failed, retry scheduled"
                    );
                    return Ok(CreateOutcome::RetryScheduled {
                        next_attempt: next.attempt,
                        delay,
                    });
                }
                // No retry exists, so this attempt is the last one.
                Err(e) => {
                    warn!(subscription_id = %sub_id, error = %e, "retry could not be queued");
                    error = format!("{error}; retry not queued: {e}");
                }
            }
        }

        error!(
            subscription_id = %sub_id,
            attempts = job.attempt,
            %error,
            "instance creation failed permanently"
        );
        if let Some(sub) = self.state.get_subscription(sub_id)? {
            self.queue.notify(
                Notification::new(NotificationKind::ProvisioningFailed, &sub.user_id)
                    .for_subscription(sub_id)
                    .with_detail(serde_json::json!({
                        "attempts": job.attempt,
                        "error": error,
                    })),
            );
        }
        Ok(CreateOutcome::Exhausted { error })
    }

    // ── Health ─────────────────────────────────────────────────────

    /// Queue a delayed remediation. `true` when a new job was queued.
    fn queue_remediation(&self, instance_id: &str) -> bool {
        let payload = InstanceRef {
            instance_id: instance_id.to_string(),
        };
        self.queue
            .enqueue(
                Lane::Pod,
                jobs::REMEDIATE_POD,
                serde_json::to_value(&payload).unwrap_or_default(),
                JobOptions::default()
                    .with_job_id(remediation_job_id(instance_id))
                    .with_delay(self.timings.remediation_delay),
            )
            .is_some_and(|h| !h.deduplicated)
    }

    /// Check every PENDING or RUNNING instance and queue remediation for
    /// the unhealthy ones, at most `remediation_cap` per sweep.
    pub async fn health_sweep(&self) -> LifecycleResult<PodHealthReport> {
        let now = self.clock.now();
        let mut report = PodHealthReport::default();
        let instances = self
            .state
            .list_instances_with_status(&[PodStatus::Pending, PodStatus::Running])?;

        for inst in instances {
            report.checked += 1;
            let status = match self.reconciler.resolve_status(&inst.id).await {
                Ok(r) if r.status == PodStatus::Error => {
                    report.errors.push((inst.id.clone(), r.message));
                    continue;
                }
                Ok(r) => r.status,
                Err(e) => {
                    report.errors.push((inst.id.clone(), e.to_string()));
                    continue;
                }
            };
            if let Err(e) = self.state.update_instance(&inst.id, |i| {
                i.last_health_check = Some(now);
            }) {
                debug!(instance_id = %inst.id, error = %e, "health stamp not saved");
            }

            if !status.is_unhealthy() {
                report.healthy += 1;
                continue;
            }
            report.unhealthy += 1;
            if report.remediation_queued.len() >= self.timings.remediation_cap {
                debug!(instance_id = %inst.id, "remediation cap reached");
                continue;
            }
            if self.queue_remediation(&inst.id) {
                report.remediation_queued.push(inst.id.clone());
            }
        }

        let level_warn = report.unhealthy > 0 || !report.errors.is_empty();
        if level_warn {
            warn!(
                checked = report.checked,
                healthy = report.healthy,
                unhealthy = report.unhealthy,
                errors = report.errors.len(),
                queued = report.remediation_queued.len(),
                "pod health sweep found problems"
            );
        } else {
            debug!(checked = report.checked, "pod health sweep clean");
        }
        Ok(report)
    }

    /// Wait out the settle period unless shutdown arrives first.
    /// Returns `false` when interrupted.
    async fn settle(&self) -> bool {
        let wait = tokio::time::sleep(self.timings.restart_settle);
        match self.shutdown.clone() {
            Some(mut rx) => {
                if *rx.borrow() {
                    return false;
                }
                tokio::select! {
                    _ = wait => true,
                    _ = rx.changed() => false,
                }
            }
            None => {
                wait.await;
                true
            }
        }
    }

    /// Restart an unhealthy instance and report the result to its owner.
    ///
    /// The status is re-checked first: the instance may have recovered
    /// while the job waited in the queue.
    pub async fn remediate(&self, instance_id: &str) -> LifecycleResult<RemediationOutcome> {
        let inst = self
            .state
            .get_instance(instance_id)?
            .ok_or_else(|| LifecycleError::InstanceNotFound(instance_id.to_string()))?;
        if let Some(reason) = self.skip_reason(&inst)? {
            return Ok(RemediationOutcome::Skipped { reason });
        }

        let before = self.reconciler.resolve_status(instance_id).await?;
        if before.status == PodStatus::Error {
            // Fail the job so the lane retries later.
            return Err(LifecycleError::PlatformUnavailable(before.message));
        }
        if !before.status.is_unhealthy() {
            debug!(%instance_id, status = %before.status, "remediation not needed");
            return Ok(RemediationOutcome::NotNeeded {
                status: before.status,
            });
        }

        info!(%instance_id, status = %before.status, "restarting unhealthy instance");
        self.orchestrator.restart(instance_id).await?;
        if !self.settle().await {
            info!(%instance_id, "remediation interrupted by shutdown");
            return Ok(RemediationOutcome::Interrupted);
        }

        let after = self.reconciler.resolve_status(instance_id).await?;
        self.queue.notify(
            Notification::new(NotificationKind::PodRestarted, &inst.user_id)
                .for_subscription(&inst.subscription_id)
                .for_instance(instance_id)
                .with_detail(serde_json::json!({
                    "status_before": before.status,
                    "status_after": after.status,
                })),
        );
        if after.status.is_unhealthy() {
            warn!(%instance_id, status = %after.status, "instance still unhealthy after restart");
        } else {
            info!(%instance_id, status = %after.status, "instance restarted");
        }
        Ok(RemediationOutcome::Restarted {
            status: after.status,
        })
    }

    fn skip_reason(&self, inst: &ServiceInstance) -> LifecycleResult<Option<String>> {
        if inst.status == PodStatus::Deleted {
            return Ok(Some("instance deleted".to_string()));
        }
        let wants = self
            .state
            .get_subscription(&inst.subscription_id)?
            .is_some_and(|s| s.status.wants_instance());
        Ok((!wants).then(|| "subscription not active".to_string()))
    }

    // ── Cleanup ────────────────────────────────────────────────────

    /// Act on instances unhealthy for longer than the failed cutoff:
    /// remediate if the subscription is active, delete otherwise.
    pub async fn cleanup_failed(&self) -> LifecycleResult<FailedCleanupReport> {
        let cutoff = self.clock.now() - to_delta(self.timings.failed_cutoff);
        let mut report = FailedCleanupReport::default();
        let stale = self
            .state
            .list_instances_with_status(&[PodStatus::Failed, PodStatus::Unknown])?
            .into_iter()
            .filter(|i| i.failed_since.is_some_and(|t| t <= cutoff));

        for inst in stale {
            let active = self
                .state
                .get_subscription(&inst.subscription_id)?
                .is_some_and(|s| s.status.wants_instance());
            if active {
                if self.queue_remediation(&inst.id) {
                    report.remediation_queued.push(inst.id);
                }
                continue;
            }
            match self.delete_pod(&inst.id).await {
                Ok(_) => report.deleted.push(inst.id),
                Err(e) => {
                    warn!(instance_id = %inst.id, error = %e, "failed instance not removed");
                    report.errors.push((inst.id, e.to_string()));
                }
            }
        }
        if !report.deleted.is_empty() || !report.remediation_queued.is_empty() {
            info!(
                deleted = report.deleted.len(),
                remediation_queued = report.remediation_queued.len(),
                errors = report.errors.len(),
                "failed instances handled"
            );
        }
        Ok(report)
    }

    pub async fn delete_pod(&self, instance_id: &str) -> LifecycleResult<TeardownReport> {
        Ok(self.orchestrator.teardown(instance_id).await?)
    }
}
