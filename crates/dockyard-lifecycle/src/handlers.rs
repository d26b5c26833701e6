//! Queue wiring: lane handlers and the recurring lifecycle schedule.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use dockyard_orchestrator::OrchestratorError;
use dockyard_orphan::OrphanDetector;
use dockyard_queue::{
    Handlers, JobContext, JobHandle, JobOptions, JobQueue, Lane, Notification, NotificationKind,
    handler_fn,
};

use crate::error::LifecycleError;
use crate::jobs::{self, CreatePod, InstanceRef};
use crate::pod::PodCoordinator;
use crate::sink::NotificationSink;
use crate::subscription::{BatchReport, SubscriptionCoordinator};
use crate::timings::LifecycleTimings;

/// Everything the lifecycle lanes dispatch to.
#[derive(Clone)]
pub struct LifecycleServices {
    pub subscriptions: SubscriptionCoordinator,
    pub pods: PodCoordinator,
    pub orphans: OrphanDetector,
    pub sink: Arc<dyn NotificationSink>,
}

fn log_batch(job_type: &str, report: &BatchReport) {
    for (id, error) in &report.errors {
        warn!(%job_type, subscription_id = %id, %error, "subscription step failed");
    }
    if report.done.is_empty() {
        debug!(%job_type, "nothing to do");
    } else {
        info!(%job_type, count = report.done.len(), "subscriptions processed");
    }
}

impl LifecycleServices {
    /// Register handlers on the subscription, pod, notification and
    /// cleanup lanes. The billing lane is left to its own collaborator.
    pub fn register(&self, queue: &JobQueue) {
        queue.register_worker(Lane::Subscription, self.subscription_handlers(), None);
        queue.register_worker(Lane::Pod, self.pod_handlers(), None);
        queue.register_worker(Lane::Notification, self.notification_handlers(), None);
        queue.register_worker(Lane::Cleanup, self.cleanup_handlers(), None);
    }

    fn subscription_handlers(&self) -> Handlers {
        let check = self.subscriptions.clone();
        let warn_soon = self.subscriptions.clone();
        let cleanup = self.subscriptions.clone();
        Handlers::new()
            .on(
                jobs::CHECK_EXPIRED,
                handler_fn(move |_job: JobContext| {
                    let c = check.clone();
                    async move {
                        log_batch(jobs::CHECK_EXPIRED, &c.check_expired().await?);
                        anyhow::Ok(())
                    }
                }),
            )
            .on(
                jobs::WARN_EXPIRING,
                handler_fn(move |_job: JobContext| {
                    let c = warn_soon.clone();
                    async move {
                        log_batch(jobs::WARN_EXPIRING, &c.warn_expiring()?);
                        anyhow::Ok(())
                    }
                }),
            )
            .on(
                jobs::CLEANUP_EXPIRED,
                handler_fn(move |_job: JobContext| {
                    let c = cleanup.clone();
                    async move {
                        log_batch(jobs::CLEANUP_EXPIRED, &c.cleanup_expired().await?);
                        anyhow::Ok(())
                    }
                }),
            )
    }

    fn pod_handlers(&self) -> Handlers {
        let create = self.pods.clone();
        let sweep = self.pods.clone();
        let remediate = self.pods.clone();
        let failed = self.pods.clone();
        let delete = self.pods.clone();
        Handlers::new()
            .on(
                jobs::CREATE_POD,
                handler_fn(move |job: JobContext| {
                    let c = create.clone();
                    async move {
                        let req: CreatePod = job.parse()?;
                        let outcome = c.create_pod(&req).await?;
                        debug!(subscription_id = %req.subscription_id, ?outcome, "create_pod done");
                        anyhow::Ok(())
                    }
                }),
            )
            .on(
                jobs::HEALTH_SWEEP,
                handler_fn(move |_job: JobContext| {
                    let c = sweep.clone();
                    async move {
                        c.health_sweep().await?;
                        anyhow::Ok(())
                    }
                }),
            )
            .on(
                jobs::REMEDIATE_POD,
                handler_fn(move |job: JobContext| {
                    let c = remediate.clone();
                    async move {
                        let r: InstanceRef = job.parse()?;
                        match c.remediate(&r.instance_id).await {
                            Ok(outcome) => {
                                debug!(instance_id = %r.instance_id, ?outcome, "remediation done");
                                anyhow::Ok(())
                            }
                            Err(LifecycleError::InstanceNotFound(id)) => {
                                debug!(instance_id = %id, "instance gone, remediation dropped");
                                anyhow::Ok(())
                            }
                            Err(e) => Err(anyhow::Error::from(e)),
                        }
                    }
                }),
            )
            .on(
                jobs::CLEANUP_FAILED,
                handler_fn(move |_job: JobContext| {
                    let c = failed.clone();
                    async move {
                        c.cleanup_failed().await?;
                        anyhow::Ok(())
                    }
                }),
            )
            .on(
                jobs::DELETE_POD,
                handler_fn(move |job: JobContext| {
                    let c = delete.clone();
                    async move {
                        let r: InstanceRef = job.parse()?;
                        match c.delete_pod(&r.instance_id).await {
                            Ok(_) => anyhow::Ok(()),
                            Err(LifecycleError::Orchestrator(
                                OrchestratorError::InstanceNotFound(_),
                            )) => anyhow::Ok(()),
                            Err(e) => Err(anyhow::Error::from(e)),
                        }
                    }
                }),
            )
    }

    fn notification_handlers(&self) -> Handlers {
        NotificationKind::ALL
            .into_iter()
            .fold(Handlers::new(), |handlers, kind| {
                let sink = self.sink.clone();
                handlers.on(
                    kind.as_str(),
                    handler_fn(move |job: JobContext| {
                        let sink = sink.clone();
                        async move {
                            let n: Notification = job.parse()?;
                            sink.deliver(&n).await
                        }
                    }),
                )
            })
    }

    fn cleanup_handlers(&self) -> Handlers {
        let detector = self.orphans.clone();
        Handlers::new().on(
            jobs::ORPHAN_SCAN,
            handler_fn(move |_job: JobContext| {
                let d = detector.clone();
                async move {
                    // Detection only; removal needs an operator's confirmation.
                    let orphans = d.find_orphans().await?;
                    for orphan in &orphans {
                        warn!(%orphan, "orphaned deployment");
                    }
                    info!(count = orphans.len(), "orphan scan finished");
                    anyhow::Ok(())
                }
            }),
        )
    }
}

/// Queue the periodic lifecycle jobs. Fixed job ids make repeated calls
/// (one per daemon start) no-ops while the schedule is live.
pub fn schedule_recurring(queue: &JobQueue, timings: &LifecycleTimings) -> Vec<JobHandle> {
    let schedule = [
        (Lane::Subscription, jobs::CHECK_EXPIRED, timings.expiry_check_interval),
        (Lane::Subscription, jobs::WARN_EXPIRING, timings.expiry_check_interval),
        (Lane::Subscription, jobs::CLEANUP_EXPIRED, timings.cleanup_interval),
        (Lane::Pod, jobs::HEALTH_SWEEP, timings.pod_health_interval),
        (Lane::Pod, jobs::CLEANUP_FAILED, timings.cleanup_interval),
        (Lane::Cleanup, jobs::ORPHAN_SCAN, timings.orphan_scan_interval),
    ];
    schedule
        .into_iter()
        .filter_map(|(lane, job_type, every)| {
            queue.enqueue(
                lane,
                job_type,
                Value::Null,
                JobOptions::default()
                    .with_job_id(format!("recurring:{job_type}"))
                    .every(every),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeDelta;
    use dockyard_orchestrator::OrchestratorSettings;
    use dockyard_queue::JobOutcome;
    use dockyard_state::PodStatus;

    use crate::sink::MemoryNotificationSink;
    use crate::testing::{Harness, t0};

    fn services(h: &Harness, sink: Arc<MemoryNotificationSink>) -> LifecycleServices {
        let timings = LifecycleTimings {
            restart_settle: std::time::Duration::ZERO,
            ..Default::default()
        };
        LifecycleServices {
            subscriptions: SubscriptionCoordinator::new(
                h.state.clone(),
                h.orchestrator.clone(),
                h.queue.clone(),
                h.shared_clock(),
                &timings,
            ),
            pods: PodCoordinator::new(
                h.state.clone(),
                h.orchestrator.clone(),
                h.reconciler.clone(),
                h.queue.clone(),
                h.shared_clock(),
                timings,
            ),
            orphans: OrphanDetector::new(
                h.state.clone(),
                h.platform.clone(),
                &OrchestratorSettings::default(),
            ),
            sink,
        }
    }

    #[tokio::test]
    async fn provisioning_request_flows_to_ready_notification() {
        let h = Harness::new().await;
        let sink = Arc::new(MemoryNotificationSink::new());
        let svc = services(&h, sink.clone());
        svc.register(&h.queue);

        let sub = h.subscribe("alice", t0() + TimeDelta::days(30));
        svc.subscriptions.request_provisioning(&sub.id).unwrap();
        let outcome = h.queue.process_next(Lane::Pod).await.unwrap();
        assert!(matches!(outcome, Some(JobOutcome::Completed { .. })));

        let inst = h
            .state
            .find_live_instance_for_subscription(&sub.id)
            .unwrap()
            .unwrap();
        h.reconciler.sweep().await.unwrap();
        assert_eq!(
            h.state.get_instance(&inst.id).unwrap().unwrap().status,
            PodStatus::Running
        );

        let delivered = h.queue.process_next(Lane::Notification).await.unwrap();
        assert!(matches!(delivered, Some(JobOutcome::Completed { .. })));
        let sent = sink.delivered();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::PodReady);
        assert_eq!(sent[0].user_id, "alice");
    }

    #[tokio::test]
    async fn remediation_of_vanished_instance_completes() {
        let h = Harness::new().await;
        let svc = services(&h, Arc::new(MemoryNotificationSink::new()));
        svc.register(&h.queue);
        h.queue.enqueue(
            Lane::Pod,
            jobs::REMEDIATE_POD,
            serde_json::json!({ "instance_id": "nope" }),
            JobOptions::default(),
        );
        let outcome = h.queue.process_next(Lane::Pod).await.unwrap();
        assert!(matches!(outcome, Some(JobOutcome::Completed { .. })));
    }

    #[tokio::test]
    async fn orphan_scan_leaves_resources_alone() {
        let h = Harness::new().await;
        let svc = services(&h, Arc::new(MemoryNotificationSink::new()));
        svc.register(&h.queue);
        let (_, inst) = h.provisioned("alice", t0() + TimeDelta::days(30)).await;
        h.state
            .update_instance(&inst.id, |i| i.status = PodStatus::Deleted)
            .unwrap();

        h.queue.enqueue(Lane::Cleanup, jobs::ORPHAN_SCAN, Value::Null, JobOptions::default());
        let outcome = h.queue.process_next(Lane::Cleanup).await.unwrap();
        assert!(matches!(outcome, Some(JobOutcome::Completed { .. })));
        assert!(h.sim.has_deployment(&inst.refs.namespace, &inst.refs.deployment));
        assert_eq!(svc.orphans.find_orphans().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recurring_schedule_is_registered_once() {
        let h = Harness::new().await;
        let timings = LifecycleTimings::default();
        let first = schedule_recurring(&h.queue, &timings);
        assert_eq!(first.len(), 6);
        assert!(first.iter().all(|j| !j.deduplicated));

        let second = schedule_recurring(&h.queue, &timings);
        assert!(second.iter().all(|j| j.deduplicated));
        assert_eq!(h.queue.lane_counts(Lane::Subscription).unwrap().ready, 3);
        assert_eq!(h.queue.lane_counts(Lane::Pod).unwrap().ready, 2);
        assert_eq!(h.queue.lane_counts(Lane::Cleanup).unwrap().ready, 1);
    }
}
