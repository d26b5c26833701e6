//! Domain types for the Dockyard state store.
//!
//! These types represent the persisted state of subscriptions, service
//! instances, worker nodes, catalog entries, usage samples, and queued jobs.
//! All types are serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub type SubscriptionId = String;
pub type UserId = String;
pub type ServiceId = String;
pub type InstanceId = String;
pub type NodeId = String;
pub type JobId = String;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── Subscription ───────────────────────────────────────────────────

/// A user's purchased right to run one service instance until `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub service_id: ServiceId,
    pub status: SubscriptionStatus,
    /// Subdomain label used for the external ingress host.
    pub subdomain: String,
    pub expires_at: DateTime<Utc>,
    /// When the subscription left ACTIVE through expiry or cancellation.
    /// The grace period is measured from here.
    pub ended_at: Option<DateTime<Utc>>,
    /// The owned instance, if one has been provisioned.
    pub instance_id: Option<InstanceId>,
    pub expiry_warning_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
    Suspended,
    PendingDeployment,
    Deleted,
}

impl SubscriptionStatus {
    /// Whether an instance may be provisioned or remediated for this status.
    pub fn wants_instance(self) -> bool {
        matches!(self, Self::Active | Self::PendingDeployment)
    }

    /// Statuses that start the grace-period clock.
    pub fn is_ended(self) -> bool {
        matches!(self, Self::Expired | Self::Cancelled)
    }
}

impl Subscription {
    /// A freshly purchased subscription awaiting its first deployment.
    pub fn new(
        user_id: &str,
        service_id: &str,
        subdomain: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.to_string(),
            service_id: service_id.to_string(),
            status: SubscriptionStatus::PendingDeployment,
            subdomain: subdomain.to_string(),
            expires_at,
            ended_at: None,
            instance_id: None,
            expiry_warning_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the key for the subscriptions table.
    pub fn table_key(&self) -> &str {
        &self.id
    }

    /// When the grace period for an ended subscription elapses.
    pub fn grace_ends_at(&self, grace: TimeDelta) -> Option<DateTime<Utc>> {
        self.ended_at.and_then(|ended| ended.checked_add_signed(grace))
    }
}

// ── Catalog ────────────────────────────────────────────────────────

/// CPU/memory requests and limits in platform quantity notation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSpec {
    /// e.g. `"250m"` or `"1"`.
    pub cpu_request: String,
    pub cpu_limit: String,
    /// e.g. `"256Mi"` or `"1Gi"`.
    pub memory_request: String,
    pub memory_limit: String,
}

impl ResourceSpec {
    /// Requested CPU in millicores, if the quantity parses.
    pub fn cpu_request_millis(&self) -> Option<u64> {
        parse_cpu_millis(&self.cpu_request)
    }

    /// Requested memory in bytes, if the quantity parses.
    pub fn memory_request_bytes(&self) -> Option<u64> {
        parse_memory_bytes(&self.memory_request)
    }
}

/// A service definition users can subscribe to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub id: ServiceId,
    /// DNS-safe short name (`n8n`, `ghost`, `strapi`).
    pub slug: String,
    pub display_name: String,
    pub image: String,
    pub container_port: u16,
    pub replicas: u32,
    pub resources: ResourceSpec,
    /// Environment templates; values may contain `{{ placeholder }}` markers.
    pub env: BTreeMap<String, String>,
    /// Maximum concurrent instances; `None` means unlimited.
    pub quota: Option<u32>,
    /// Slots currently held by live instances.
    pub in_use: u32,
}

impl CatalogEntry {
    pub fn has_capacity(&self) -> bool {
        self.quota.is_none_or(|q| self.in_use < q)
    }
}

// ── Service instance ───────────────────────────────────────────────

/// Lifecycle status of a provisioned workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodStatus {
    Pending,
    Running,
    Stopped,
    Failed,
    Unknown,
    /// The control plane could not be reached when status was resolved.
    Error,
    Deleted,
}

impl PodStatus {
    pub fn is_unhealthy(self) -> bool {
        matches!(self, Self::Failed | Self::Unknown)
    }

    pub fn is_live(self) -> bool {
        self != Self::Deleted
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
            Self::Error => "ERROR",
            Self::Deleted => "DELETED",
        }
    }
}

impl std::fmt::Display for PodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names of the platform objects backing one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformResourceRefs {
    pub namespace: String,
    pub deployment: String,
    pub service: String,
    /// Absent when ingress creation failed or was never attempted.
    pub ingress: Option<String>,
}

/// The concrete provisioned workload backing a subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceInstance {
    pub id: InstanceId,
    pub subscription_id: SubscriptionId,
    pub user_id: UserId,
    pub service_id: ServiceId,
    pub refs: PlatformResourceRefs,
    pub internal_url: String,
    pub external_url: Option<String>,
    pub resources: ResourceSpec,
    pub status: PodStatus,
    pub status_message: Option<String>,
    pub desired_replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
    pub restart_count: u32,
    pub last_status_sync: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    /// Set on entering FAILED/UNKNOWN, cleared once RUNNING again.
    pub failed_since: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ServiceInstance {
    /// A new PENDING instance record for freshly created platform objects.
    pub fn new(
        subscription: &Subscription,
        refs: PlatformResourceRefs,
        internal_url: String,
        resources: ResourceSpec,
        desired_replicas: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            subscription_id: subscription.id.clone(),
            user_id: subscription.user_id.clone(),
            service_id: subscription.service_id.clone(),
            refs,
            internal_url,
            external_url: None,
            resources,
            status: PodStatus::Pending,
            status_message: None,
            desired_replicas,
            ready_replicas: 0,
            available_replicas: 0,
            restart_count: 0,
            last_status_sync: None,
            last_health_check: None,
            failed_since: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

// ── Worker node ────────────────────────────────────────────────────

/// Lifecycle status of a registered worker host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Registered but no heartbeat received yet.
    Pending,
    Active,
    NotReady,
    Inactive,
    /// Set by an operator drain; the health sweep leaves it alone.
    Maintenance,
}

/// CPU, memory, and pod-slot quantities for a node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeResources {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    pub pods: u32,
}

/// A registered cluster host contributing capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerNode {
    pub id: NodeId,
    pub hostname: String,
    pub address: String,
    pub capacity: NodeResources,
    pub allocated: NodeResources,
    pub ready: bool,
    pub schedulable: bool,
    /// Operator cordon; survives health transitions.
    pub cordoned: bool,
    pub status: NodeStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkerNode {
    pub fn new(hostname: &str, address: &str, capacity: NodeResources, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            hostname: hostname.to_string(),
            address: address.to_string(),
            capacity,
            allocated: NodeResources::default(),
            ready: false,
            schedulable: false,
            cordoned: false,
            status: NodeStatus::Pending,
            last_heartbeat: None,
            last_health_check: None,
            labels: BTreeMap::new(),
            registered_at: now,
            updated_at: now,
        }
    }
}

// ── Usage ──────────────────────────────────────────────────────────

/// Point-in-time usage sample for one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageMetric {
    pub instance_id: InstanceId,
    pub recorded_at: DateTime<Utc>,
    pub status: PodStatus,
    pub desired_replicas: u32,
    pub ready_replicas: u32,
    pub restart_count: u32,
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

// ── Jobs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    DeadLettered,
}

/// A queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub lane: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Higher runs first within a lane.
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Not visible to workers before this instant.
    pub run_at: DateTime<Utc>,
    pub state: JobState,
    /// Period for recurring jobs, in milliseconds.
    pub repeat_every_ms: Option<u64>,
    /// Caller-supplied identity; at most one live job per key.
    pub dedupe_key: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(
        lane: &str,
        job_type: &str,
        payload: serde_json::Value,
        max_attempts: u32,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            lane: lane.to_string(),
            job_type: job_type.to_string(),
            payload,
            priority: 0,
            attempts: 0,
            max_attempts,
            run_at,
            state: JobState::Waiting,
            repeat_every_ms: None,
            dedupe_key: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ordering key among ready jobs: priority desc, then run_at, then age.
    pub fn runs_before(&self, other: &JobRecord) -> bool {
        (std::cmp::Reverse(self.priority), self.run_at, self.created_at)
            < (std::cmp::Reverse(other.priority), other.run_at, other.created_at)
    }
}

// ── Quantity parsing ───────────────────────────────────────────────

/// Parse a CPU quantity (`"250m"`, `"1"`, `"0.5"`) into millicores.
///
/// Quantities that do not fit in a `u64` of millicores are rejected.
pub fn parse_cpu_millis(quantity: &str) -> Option<u64> {
    let q = quantity.trim();
    if let Some(millis) = q.strip_suffix('m') {
        return millis.parse::<u64>().ok();
    }
    let cores: f64 = q.parse().ok()?;
    let millis = (cores * 1000.0).round();
    // 2^64 is exactly representable; anything at or above it overflows.
    (millis.is_finite() && (0.0..18_446_744_073_709_551_616.0).contains(&millis))
        .then_some(millis as u64)
}

/// Parse a memory quantity (`"256Mi"`, `"1Gi"`, `"500M"`, `"1024"`) into bytes.
pub fn parse_memory_bytes(quantity: &str) -> Option<u64> {
    const UNITS: [(&str, u64); 8] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];
    let q = quantity.trim();
    for (suffix, multiplier) in UNITS {
        if let Some(n) = q.strip_suffix(suffix) {
            return n.parse::<u64>().ok()?.checked_mul(multiplier);
        }
    }
    q.parse::<u64>().ok()
}

impl UsageMetric {
    /// Build the composite key for the usage table.
    pub fn table_key(&self) -> String {
        format!(
            "{}:{:020}",
            self.instance_id,
            self.recorded_at.timestamp_millis().max(0)
        )
    }
}
