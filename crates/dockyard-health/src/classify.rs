//! Node status classification from heartbeat age.

use chrono::{DateTime, TimeDelta, Utc};

use dockyard_core::{HealthSettings, to_delta};
use dockyard_state::{NodeStatus, WorkerNode};

/// Heartbeat age limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Older than this → NOT_READY.
    pub heartbeat_timeout: TimeDelta,
    /// Older than this → INACTIVE.
    pub inactive_timeout: TimeDelta,
}

impl Thresholds {
    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self {
            heartbeat_timeout: to_delta(settings.heartbeat_timeout()),
            inactive_timeout: to_delta(settings.inactive_timeout()),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_settings(&HealthSettings::default())
    }
}

/// Status a node should have at `now`.
///
/// MAINTENANCE is sticky: only operator actions leave it. A node that has
/// never sent a heartbeat stays PENDING.
pub fn classify(
    current: NodeStatus,
    last_heartbeat: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> NodeStatus {
    if current == NodeStatus::Maintenance {
        return current;
    }
    let Some(beat) = last_heartbeat else {
        return NodeStatus::Pending;
    };
    let age = now - beat;
    if age > thresholds.inactive_timeout {
        NodeStatus::Inactive
    } else if age > thresholds.heartbeat_timeout {
        NodeStatus::NotReady
    } else {
        NodeStatus::Active
    }
}

/// Recompute status and the readiness flags that follow from it.
///
/// Returns the previous status when it changed.
pub fn reclassify(
    node: &mut WorkerNode,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> Option<NodeStatus> {
    let previous = node.status;
    let next = classify(previous, node.last_heartbeat, now, thresholds);
    node.status = next;
    match next {
        NodeStatus::Active => {
            node.ready = true;
            node.schedulable = !node.cordoned;
        }
        NodeStatus::Maintenance => {
            node.schedulable = false;
        }
        NodeStatus::Pending | NodeStatus::NotReady | NodeStatus::Inactive => {
            node.ready = false;
            node.schedulable = false;
        }
    }
    node.last_health_check = Some(now);
    (previous != next).then_some(previous)
}
