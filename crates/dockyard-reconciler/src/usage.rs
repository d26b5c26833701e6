//! Usage collector: periodic per-instance samples for billing and
//! dashboards.

use std::time::Duration;

use chrono::TimeDelta;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use dockyard_core::{SharedClock, to_delta};
use dockyard_orchestrator::naming::pod_selector;
use dockyard_platform::Platform;
use dockyard_state::{PodStatus, StateStore, UsageMetric};

use crate::error::ReconcileResult;

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageReport {
    pub recorded: usize,
    pub pruned: u32,
    pub errors: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct UsageCollector {
    state: StateStore,
    platform: Platform,
    clock: SharedClock,
    retention: TimeDelta,
}

impl UsageCollector {
    pub fn new(state: StateStore, platform: Platform, clock: SharedClock, retention: Duration) -> Self {
        Self {
            state,
            platform,
            clock,
            retention: to_delta(retention),
        }
    }

    /// Sample every RUNNING instance, then drop samples past retention.
    pub async fn collect(&self) -> ReconcileResult<UsageReport> {
        let mut report = UsageReport::default();
        let now = self.clock.now();

        if self.platform.is_ready() {
            for inst in self.state.list_instances_with_status(&[PodStatus::Running])? {
                let refs = &inst.refs;
                let pods = match self
                    .platform
                    .list_pods(&refs.namespace, &pod_selector(&refs.deployment))
                    .await
                {
                    Ok(pods) => pods,
                    Err(e) => {
                        warn!(instance_id = %inst.id, error = %e, "usage sample skipped");
                        report.errors.push((inst.id.clone(), e.to_string()));
                        continue;
                    }
                };
                let restarts: u32 = pods.iter().map(|p| p.restart_count).sum();
                let ready = pods.iter().filter(|p| p.ready).count() as u32;
                let sample = UsageMetric {
                    instance_id: inst.id.clone(),
                    recorded_at: now,
                    status: inst.status,
                    desired_replicas: inst.desired_replicas,
                    ready_replicas: ready,
                    restart_count: restarts,
                    cpu_millis: inst.resources.cpu_request_millis().unwrap_or(0)
                        * u64::from(ready),
                    memory_bytes: inst.resources.memory_request_bytes().unwrap_or(0)
                        * u64::from(ready),
                };
                if let Err(e) = self.state.put_usage(&sample) {
                    report.errors.push((inst.id.clone(), e.to_string()));
                    continue;
                }
                if restarts != inst.restart_count {
                    self.state.update_instance(&inst.id, |i| {
                        i.restart_count = restarts;
                    })?;
                }
                report.recorded += 1;
            }
        } else {
            debug!("control plane not ready, usage sampling skipped");
        }

        report.pruned = self.state.prune_usage_before(now - self.retention)?;
        info!(
            recorded = report.recorded,
            pruned = report.pruned,
            errors = report.errors.len(),
            "usage collected"
        );
        Ok(report)
    }

    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?interval, "usage collector started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.collect().await {
                        error!(error = %e, "usage collection failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("usage collector shutting down");
                    break;
                }
            }
        }
    }
}
