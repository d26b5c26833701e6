//! Shared fixture for coordinator tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dockyard_core::{ManualClock, SharedClock};
use dockyard_orchestrator::{OrchestratorSettings, ResourceOrchestrator};
use dockyard_platform::{Platform, SimulatedPlatform};
use dockyard_queue::{JobQueue, MemoryBackend, NotificationKind, QueueBackend};
use dockyard_reconciler::StatusReconciler;
use dockyard_state::{CatalogEntry, ResourceSpec, ServiceInstance, StateStore, Subscription};

pub const SERVICE_ID: &str = "svc-ghost";

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub struct Harness {
    pub state: StateStore,
    pub sim: Arc<SimulatedPlatform>,
    pub platform: Platform,
    pub clock: ManualClock,
    pub backend: Arc<MemoryBackend>,
    pub queue: JobQueue,
    pub orchestrator: ResourceOrchestrator,
    pub reconciler: StatusReconciler,
}

impl Harness {
    pub async fn new() -> Self {
        let state = StateStore::open_in_memory().unwrap();
        state
            .put_catalog_entry(&CatalogEntry {
                id: SERVICE_ID.into(),
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
                env: BTreeMap::new(),
                quota: Some(50),
                in_use: 0,
            })
            .unwrap();
        let sim = Arc::new(SimulatedPlatform::new());
        let platform = Platform::connect(sim.clone()).await;
        let clock = ManualClock::new(t0());
        let shared: SharedClock = Arc::new(clock.clone());
        let backend = Arc::new(MemoryBackend::new());
        let queue = JobQueue::new(backend.clone(), shared.clone());
        let orchestrator = ResourceOrchestrator::new(
            state.clone(),
            platform.clone(),
            shared.clone(),
            OrchestratorSettings::default(),
        );
        let reconciler =
            StatusReconciler::new(state.clone(), platform.clone(), queue.clone(), shared);
        Self {
            state,
            sim,
            platform,
            clock,
            backend,
            queue,
            orchestrator,
            reconciler,
        }
    }

    pub fn shared_clock(&self) -> SharedClock {
        Arc::new(self.clock.clone())
    }

    pub fn subscribe(&self, user: &str, expires_at: DateTime<Utc>) -> Subscription {
        let sub = Subscription::new(user, SERVICE_ID, user, expires_at, self.clock_now());
        self.state.put_subscription(&sub).unwrap();
        sub
    }

    pub async fn provisioned(
        &self,
        user: &str,
        expires_at: DateTime<Utc>,
    ) -> (Subscription, ServiceInstance) {
        let sub = self.subscribe(user, expires_at);
        let inst = self.orchestrator.provision(&sub.id, None).await.unwrap().instance;
        (sub, inst)
    }

    fn clock_now(&self) -> DateTime<Utc> {
        use dockyard_core::Clock;
        self.clock.now()
    }

    /// Queued notification jobs of one kind.
    pub fn notifications(&self, kind: NotificationKind) -> usize {
        self.backend
            .list("notification")
            .unwrap()
            .iter()
            .filter(|j| j.job_type == kind.as_str())
            .count()
    }

    pub fn jobs_of_type(&self, lane: &str, job_type: &str) -> Vec<dockyard_state::JobRecord> {
        self.backend
            .list(lane)
            .unwrap()
            .into_iter()
            .filter(|j| j.job_type == job_type)
            .collect()
    }

    pub fn in_use(&self) -> u32 {
        self.state.get_catalog_entry(SERVICE_ID).unwrap().unwrap().in_use
    }
}
