//! Job types and payloads for the lifecycle lanes.

use serde::{Deserialize, Serialize};

// Subscription lane.
pub const CHECK_EXPIRED: &str = "check_expired";
pub const WARN_EXPIRING: &str = "warn_expiring";
pub const CLEANUP_EXPIRED: &str = "cleanup_expired";

// Pod lane.
pub const CREATE_POD: &str = "create_pod";
pub const HEALTH_SWEEP: &str = "health_sweep";
pub const REMEDIATE_POD: &str = "remediate_pod";
pub const CLEANUP_FAILED: &str = "cleanup_failed";
pub const DELETE_POD: &str = "delete_pod";

// Cleanup lane.
pub const ORPHAN_SCAN: &str = "orphan_scan";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePod {
    pub subscription_id: String,
    /// 1-based attempt number.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl CreatePod {
    /// Job id for one attempt; a retry never collides with its predecessor.
    pub fn job_id(&self) -> String {
        format!("{CREATE_POD}:{}:{}", self.subscription_id, self.attempt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRef {
    pub instance_id: String,
}

/// At most one pending remediation per instance.
pub fn remediation_job_id(instance_id: &str) -> String {
    format!("remediate:{instance_id}")
}
