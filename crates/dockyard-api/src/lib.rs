//! dockyard-api — operator REST API for Dockyard.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness plus platform readiness |
//! | GET | `/api/v1/nodes` | List worker nodes |
//! | POST | `/api/v1/nodes` | Register a worker node |
//! | DELETE | `/api/v1/nodes/{id}` | Deregister a worker node |
//! | POST | `/api/v1/nodes/{id}/heartbeat` | Record a heartbeat |
//! | POST | `/api/v1/nodes/{id}/cordon` | Mark unschedulable |
//! | POST | `/api/v1/nodes/{id}/uncordon` | Return to service |
//! | POST | `/api/v1/nodes/{id}/drain` | Cordon, evict pods, enter maintenance |
//! | GET | `/api/v1/instances/{id}/status` | Live status of one instance |
//! | GET | `/api/v1/orphans` | List orphaned deployments |
//! | POST | `/api/v1/orphans/cleanup` | Remove orphans (requires `confirm`) |
//! | POST | `/api/v1/subscriptions/{id}/provision` | Queue instance creation |
//! | POST | `/api/v1/subscriptions/{id}/cancel` | Cancel a subscription |
//! | GET | `/api/v1/queue/lanes` | Job counts per lane |

pub mod handlers;

use axum::Router;
use axum::routing::{delete, get, post};

use dockyard_health::{NodeAdmin, WorkerHealthMonitor};
use dockyard_lifecycle::SubscriptionCoordinator;
use dockyard_orphan::OrphanDetector;
use dockyard_platform::Platform;
use dockyard_queue::JobQueue;
use dockyard_reconciler::StatusReconciler;
use dockyard_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub platform: Platform,
    pub queue: JobQueue,
    pub monitor: WorkerHealthMonitor,
    pub admin: NodeAdmin,
    pub reconciler: StatusReconciler,
    pub orphans: OrphanDetector,
    pub subscriptions: SubscriptionCoordinator,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/nodes", get(handlers::list_nodes).post(handlers::register_node))
        .route("/nodes/{id}", delete(handlers::deregister_node))
        .route("/nodes/{id}/heartbeat", post(handlers::heartbeat))
        .route("/nodes/{id}/cordon", post(handlers::cordon_node))
        .route("/nodes/{id}/uncordon", post(handlers::uncordon_node))
        .route("/nodes/{id}/drain", post(handlers::drain_node))
        .route("/instances/{id}/status", get(handlers::instance_status))
        .route("/orphans", get(handlers::list_orphans))
        .route("/orphans/cleanup", post(handlers::cleanup_orphans))
        .route("/subscriptions/{id}/provision", post(handlers::request_provisioning))
        .route("/subscriptions/{id}/cancel", post(handlers::cancel_subscription))
        .route("/queue/lanes", get(handlers::lane_counts))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz).with_state(state))
}
