//! Subscription coordinator: expiry, warnings, the grace period, and
//! permanent deletion.
//!
//! ```text
//! PENDING_DEPLOYMENT ─provision→ ACTIVE ─expires_at→ EXPIRED ─┐
//!                                  └──cancel──→ CANCELLED ────┴─grace→ DELETED
//! ```
//!
//! Expiry suspends the instance (zero replicas, objects kept). Deletion
//! tears the instance down first, then marks the subscription DELETED and
//! gives the quota slot back to the catalog entry.

use chrono::TimeDelta;
use serde::Serialize;
use tracing::{debug, info, warn};

use dockyard_core::{SharedClock, to_delta};
use dockyard_orchestrator::ResourceOrchestrator;
use dockyard_queue::{JobHandle, JobOptions, JobQueue, Lane, Notification, NotificationKind};
use dockyard_state::{StateStore, Subscription, SubscriptionStatus};

use crate::error::{LifecycleError, LifecycleResult};
use crate::jobs::{self, CreatePod};
use crate::timings::LifecycleTimings;

/// Result of a batch pass over subscriptions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Subscription ids acted on.
    pub done: Vec<String>,
    pub errors: Vec<(String, String)>,
}

impl BatchReport {
    fn fail(&mut self, id: &str, error: impl std::fmt::Display) {
        self.errors.push((id.to_string(), error.to_string()));
    }
}

#[derive(Clone)]
pub struct SubscriptionCoordinator {
    state: StateStore,
    orchestrator: ResourceOrchestrator,
    queue: JobQueue,
    clock: SharedClock,
    grace: TimeDelta,
    warning_window: TimeDelta,
}

impl SubscriptionCoordinator {
    pub fn new(
        state: StateStore,
        orchestrator: ResourceOrchestrator,
        queue: JobQueue,
        clock: SharedClock,
        timings: &LifecycleTimings,
    ) -> Self {
        Self {
            state,
            orchestrator,
            queue,
            clock,
            grace: to_delta(timings.grace_period),
            warning_window: to_delta(timings.expiry_warning_window),
        }
    }

    fn subscription(&self, id: &str) -> LifecycleResult<Subscription> {
        self.state
            .get_subscription(id)?
            .ok_or_else(|| LifecycleError::SubscriptionNotFound(id.to_string()))
    }

    /// Suspend the subscription's live instance, if it has one.
    async fn suspend_instance(&self, sub: &Subscription) -> LifecycleResult<()> {
        if let Some(inst) = self.state.find_live_instance_for_subscription(&sub.id)? {
            self.orchestrator.suspend(&inst.id).await?;
        }
        Ok(())
    }

    /// Move subscriptions past `expires_at` to EXPIRED, suspending their
    /// instances. A failed suspend leaves the subscription for the next pass.
    pub async fn check_expired(&self) -> LifecycleResult<BatchReport> {
        let now = self.clock.now();
        let mut report = BatchReport::default();
        let due = self
            .state
            .list_subscriptions_with_status(&[
                SubscriptionStatus::Active,
                SubscriptionStatus::PendingDeployment,
            ])?
            .into_iter()
            .filter(|s| s.expires_at <= now);

        for sub in due {
            if let Err(e) = self.suspend_instance(&sub).await {
                warn!(subscription_id = %sub.id, error = %e, "suspend on expiry failed");
                report.fail(&sub.id, e);
                continue;
            }
            let mut expired = false;
            self.state.update_subscription(&sub.id, |s| {
                if s.status.wants_instance() {
                    s.status = SubscriptionStatus::Expired;
                    s.ended_at = Some(now);
                    s.updated_at = now;
                    expired = true;
                }
            })?;
            if !expired {
                continue;
            }
            info!(subscription_id = %sub.id, user_id = %sub.user_id, "subscription expired");
            self.queue.notify(
                Notification::new(NotificationKind::SubscriptionExpired, &sub.user_id)
                    .for_subscription(&sub.id)
                    .with_detail(serde_json::json!({
                        "expired_at": sub.expires_at,
                        "deleted_after": now + self.grace,
                    })),
            );
            report.done.push(sub.id);
        }
        Ok(report)
    }

    /// Warn owners whose subscription expires within the warning window.
    /// Each subscription is warned once.
    pub fn warn_expiring(&self) -> LifecycleResult<BatchReport> {
        let now = self.clock.now();
        let horizon = now + self.warning_window;
        let mut report = BatchReport::default();
        let due = self
            .state
            .list_subscriptions_with_status(&[SubscriptionStatus::Active])?
            .into_iter()
            .filter(|s| {
                s.expiry_warning_sent_at.is_none() && s.expires_at > now && s.expires_at <= horizon
            });

        for sub in due {
            let mut claimed = false;
            self.state.update_subscription(&sub.id, |s| {
                if s.expiry_warning_sent_at.is_none() {
                    s.expiry_warning_sent_at = Some(now);
                    claimed = true;
                }
            })?;
            if !claimed {
                continue;
            }
            let days_left = (sub.expires_at - now).num_days();
            debug!(subscription_id = %sub.id, days_left, "expiry warning queued");
            self.queue.notify(
                Notification::new(NotificationKind::ExpiryWarning, &sub.user_id)
                    .for_subscription(&sub.id)
                    .with_detail(serde_json::json!({
                        "expires_at": sub.expires_at,
                        "days_left": days_left,
                    })),
            );
            report.done.push(sub.id);
        }
        if !report.done.is_empty() {
            info!(warned = report.done.len(), "expiry warnings queued");
        }
        Ok(report)
    }

    /// Permanently delete ended subscriptions whose grace period elapsed.
    pub async fn cleanup_expired(&self) -> LifecycleResult<BatchReport> {
        let now = self.clock.now();
        let mut report = BatchReport::default();
        let due = self
            .state
            .list_subscriptions_with_status(&[
                SubscriptionStatus::Expired,
                SubscriptionStatus::Cancelled,
            ])?
            .into_iter()
            .filter(|s| s.grace_ends_at(self.grace).is_some_and(|end| end <= now));

        for sub in due {
            match self.delete_subscription(&sub).await {
                Ok(()) => report.done.push(sub.id),
                Err(e) => {
                    warn!(subscription_id = %sub.id, error = %e, "subscription cleanup failed");
                    report.fail(&sub.id, e);
                }
            }
        }
        if !report.done.is_empty() || !report.errors.is_empty() {
            info!(
                deleted = report.done.len(),
                errors = report.errors.len(),
                "expired subscriptions cleaned up"
            );
        }
        Ok(report)
    }

    async fn delete_subscription(&self, sub: &Subscription) -> LifecycleResult<()> {
        // Instance first: a DELETED subscription never has a live instance.
        if let Some(inst) = self.state.find_live_instance_for_subscription(&sub.id)? {
            self.orchestrator.teardown(&inst.id).await?;
        }
        let now = self.clock.now();
        let mut deleted = false;
        self.state.update_subscription(&sub.id, |s| {
            if s.status.is_ended() {
                s.status = SubscriptionStatus::Deleted;
                s.updated_at = now;
                deleted = true;
            }
        })?;
        if !deleted {
            return Ok(());
        }
        if sub.instance_id.is_some() {
            self.state.update_catalog_entry(&sub.service_id, |c| {
                c.in_use = c.in_use.saturating_sub(1);
            })?;
        }
        info!(subscription_id = %sub.id, service_id = %sub.service_id, "subscription deleted");
        self.queue.notify(
            Notification::new(NotificationKind::SubscriptionDeleted, &sub.user_id)
                .for_subscription(&sub.id),
        );
        Ok(())
    }

    /// Cancel a subscription. Its instance is suspended and the grace
    /// period starts now.
    pub async fn cancel(&self, id: &str) -> LifecycleResult<Subscription> {
        let sub = self.subscription(id)?;
        if sub.status.is_ended() || sub.status == SubscriptionStatus::Deleted {
            return Err(LifecycleError::InvalidTransition {
                id: sub.id,
                status: sub.status,
            });
        }
        self.suspend_instance(&sub).await?;
        let now = self.clock.now();
        let updated = self
            .state
            .update_subscription(id, |s| {
                s.status = SubscriptionStatus::Cancelled;
                s.ended_at = Some(now);
                s.updated_at = now;
            })?
            .ok_or_else(|| LifecycleError::SubscriptionNotFound(id.to_string()))?;
        info!(subscription_id = %id, "subscription cancelled");
        Ok(updated)
    }

    /// Queue the first create attempt for a subscription.
    ///
    /// Returns `None` when the queue could not take the job.
    pub fn request_provisioning(&self, id: &str) -> LifecycleResult<Option<JobHandle>> {
        let sub = self.subscription(id)?;
        if !sub.status.wants_instance() {
            return Err(LifecycleError::InvalidTransition {
                id: sub.id,
                status: sub.status,
            });
        }
        let job = CreatePod {
            subscription_id: sub.id.clone(),
            attempt: 1,
        };
        let payload = serde_json::to_value(&job).unwrap_or_default();
        let handle = self.queue.enqueue(
            Lane::Pod,
            jobs::CREATE_POD,
            payload,
            JobOptions::default()
                .with_job_id(job.job_id())
                .with_max_attempts(1),
        );
        if handle.is_some() {
            info!(subscription_id = %id, "provisioning requested");
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use dockyard_queue::NotificationKind;
    use dockyard_state::PodStatus;

    use crate::testing::{Harness, t0};

    fn coordinator(h: &Harness) -> SubscriptionCoordinator {
        SubscriptionCoordinator::new(
            h.state.clone(),
            h.orchestrator.clone(),
            h.queue.clone(),
            h.shared_clock(),
            &LifecycleTimings::default(),
        )
    }

    fn day(n: i64) -> DateTime<Utc> {
        t0() + TimeDelta::days(n)
    }

    #[tokio::test]
    async fn expiry_suspends_but_keeps_resources() {
        let h = Harness::new().await;
        let c = coordinator(&h);
        let (sub, inst) = h.provisioned("alice", day(10)).await;

        assert!(c.check_expired().await.unwrap().done.is_empty());
        h.clock.set(day(10));
        let report = c.check_expired().await.unwrap();
        assert_eq!(report.done, vec![sub.id.clone()]);

        let stored = h.state.get_subscription(&sub.id).unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Expired);
        assert_eq!(stored.ended_at, Some(day(10)));
        let inst = h.state.get_instance(&inst.id).unwrap().unwrap();
        assert_eq!(inst.status, PodStatus::Stopped);
        assert_eq!(h.sim.deployment(&inst.refs.namespace, &inst.refs.deployment).unwrap().replicas, 0);
        assert_eq!(h.notifications(NotificationKind::SubscriptionExpired), 1);

        // Idempotent.
        assert!(c.check_expired().await.unwrap().done.is_empty());
    }

    #[tokio::test]
    async fn warning_is_sent_once_inside_window() {
        let h = Harness::new().await;
        let c = coordinator(&h);
        let (sub, _) = h.provisioned("alice", day(10)).await;

        assert!(c.warn_expiring().unwrap().done.is_empty());
        h.clock.set(day(8));
        assert_eq!(c.warn_expiring().unwrap().done, vec![sub.id.clone()]);
        h.clock.advance(Duration::from_secs(3600));
        assert!(c.warn_expiring().unwrap().done.is_empty());
        assert_eq!(h.notifications(NotificationKind::ExpiryWarning), 1);
    }

    #[tokio::test]
    async fn grace_period_then_delete_and_restore_quota() {
        let h = Harness::new().await;
        let c = coordinator(&h);
        let (sub, inst) = h.provisioned("alice", day(1)).await;
        assert_eq!(h.in_use(), 1);

        h.clock.set(day(1));
        c.check_expired().await.unwrap();

        h.clock.set(day(60));
        assert!(c.cleanup_expired().await.unwrap().done.is_empty());
        assert!(h.sim.has_deployment(&inst.refs.namespace, &inst.refs.deployment));

        h.clock.set(day(61));
        let report = c.cleanup_expired().await.unwrap();
        assert_eq!(report.done, vec![sub.id.clone()]);
        assert_eq!(
            h.state.get_subscription(&sub.id).unwrap().unwrap().status,
            SubscriptionStatus::Deleted
        );
        assert_eq!(
            h.state.get_instance(&inst.id).unwrap().unwrap().status,
            PodStatus::Deleted
        );
        assert!(!h.sim.has_deployment(&inst.refs.namespace, &inst.refs.deployment));
        assert_eq!(h.in_use(), 0);

        // A second pass finds nothing and does not restore twice.
        assert!(c.cleanup_expired().await.unwrap().done.is_empty());
        assert_eq!(h.in_use(), 0);
    }

    #[tokio::test]
    async fn failed_teardown_keeps_subscription_for_retry() {
        let h = Harness::new().await;
        let c = coordinator(&h);
        let (sub, inst) = h.provisioned("alice", day(1)).await;
        h.clock.set(day(1));
        c.check_expired().await.unwrap();

        h.sim.fail_on(
            dockyard_platform::ObjectKind::Deployment,
            &inst.refs.deployment,
        );
        h.clock.set(day(62));
        let report = c.cleanup_expired().await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(
            h.state.get_subscription(&sub.id).unwrap().unwrap().status,
            SubscriptionStatus::Expired
        );
        assert_eq!(h.in_use(), 1);

        h.sim.clear_failures();
        assert_eq!(c.cleanup_expired().await.unwrap().done.len(), 1);
    }

    #[tokio::test]
    async fn cancel_starts_grace_period() {
        let h = Harness::new().await;
        let c = coordinator(&h);
        let (sub, _) = h.provisioned("alice", day(30)).await;
        h.clock.set(day(2));
        let cancelled = c.cancel(&sub.id).await.unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert_eq!(cancelled.ended_at, Some(day(2)));
        assert!(matches!(
            c.cancel(&sub.id).await,
            Err(LifecycleError::InvalidTransition { .. })
        ));

        h.clock.set(day(63));
        assert_eq!(c.cleanup_expired().await.unwrap().done.len(), 1);
    }

    #[tokio::test]
    async fn provisioning_request_is_deduplicated() {
        let h = Harness::new().await;
        let c = coordinator(&h);
        let sub = h.subscribe("bob", day(30));
        let first = c.request_provisioning(&sub.id).unwrap().unwrap();
        let second = c.request_provisioning(&sub.id).unwrap().unwrap();
        assert_eq!(first.job_type, jobs::CREATE_POD);
        assert!(second.deduplicated);
    }
}
