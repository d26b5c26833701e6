//! Notification intents carried on the notification lane.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::job::{JobHandle, JobOptions};
use crate::lane::Lane;
use crate::manager::JobQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PodReady,
    PodRestarted,
    ProvisioningFailed,
    ExpiryWarning,
    SubscriptionExpired,
    SubscriptionDeleted,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 6] = [
        Self::PodReady,
        Self::PodRestarted,
        Self::ProvisioningFailed,
        Self::ExpiryWarning,
        Self::SubscriptionExpired,
        Self::SubscriptionDeleted,
    ];

    /// Job type used on the notification lane.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PodReady => "pod_ready",
            Self::PodRestarted => "pod_restarted",
            Self::ProvisioningFailed => "provisioning_failed",
            Self::ExpiryWarning => "expiry_warning",
            Self::SubscriptionExpired => "subscription_expired",
            Self::SubscriptionDeleted => "subscription_deleted",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| QueueError::Backend(format!("unknown notification kind: {s}")))
    }
}

/// Something the owner of a subscription should be told.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Kind-specific extras (urls, expiry dates, error text).
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl Notification {
    pub fn new(kind: NotificationKind, user_id: &str) -> Self {
        Self {
            kind,
            user_id: user_id.to_string(),
            subscription_id: None,
            instance_id: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn for_subscription(mut self, id: &str) -> Self {
        self.subscription_id = Some(id.to_string());
        self
    }

    pub fn for_instance(mut self, id: &str) -> Self {
        self.instance_id = Some(id.to_string());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

impl JobQueue {
    /// Queue a notification for delivery. Best-effort like [`JobQueue::enqueue`].
    pub fn notify(&self, notification: Notification) -> Option<JobHandle> {
        let payload = match serde_json::to_value(&notification) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(kind = %notification.kind, error = %e, "unserializable notification dropped");
                return None;
            }
        };
        self.enqueue(
            Lane::Notification,
            notification.kind.as_str(),
            payload,
            JobOptions::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{DateTime, Utc};
    use dockyard_core::ManualClock;

    use crate::backend::MemoryBackend;

    #[test]
    fn kinds_parse_from_job_types() {
        for kind in NotificationKind::ALL {
            assert_eq!(kind.as_str().parse::<NotificationKind>().unwrap(), kind);
        }
    }

    #[test]
    fn notify_lands_on_notification_lane() {
        let start = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let q = JobQueue::new(Arc::new(MemoryBackend::new()), Arc::new(ManualClock::new(start)));
        let handle = q
            .notify(Notification::new(NotificationKind::PodReady, "u1").for_instance("i1"))
            .unwrap();
        assert_eq!(handle.lane, Lane::Notification);
        assert_eq!(handle.job_type, "pod_ready");
        assert_eq!(q.lane_counts(Lane::Notification).unwrap().ready, 1);
    }
}
