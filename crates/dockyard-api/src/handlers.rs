//! REST API handlers.
//!
//! Each handler calls one component operation and wraps the result in the
//! `{success, data, error}` envelope.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dockyard_health::{HealthError, Heartbeat, NodeRegistration};
use dockyard_lifecycle::LifecycleError;
use dockyard_orphan::Orphan;
use dockyard_queue::{Lane, LaneCounts};
use dockyard_reconciler::ReconcileError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn health_error(e: HealthError) -> Response {
    let status = match e {
        HealthError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        HealthError::AlreadyRegistered(_) => StatusCode::CONFLICT,
        HealthError::Platform(_) => StatusCode::BAD_GATEWAY,
        HealthError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

fn lifecycle_error(e: LifecycleError) -> Response {
    let status = match e {
        LifecycleError::SubscriptionNotFound(_) | LifecycleError::InstanceNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        LifecycleError::InvalidTransition { .. } => StatusCode::CONFLICT,
        LifecycleError::PlatformUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "platform_ready": state.platform.is_ready(),
    }))
    .into_response()
}

// ── Nodes ──────────────────────────────────────────────────────

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> Response {
    match state.store.list_nodes() {
        Ok(nodes) => ApiResponse::ok(nodes).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// POST /api/v1/nodes
pub async fn register_node(
    State(state): State<ApiState>,
    Json(req): Json<NodeRegistration>,
) -> Response {
    if req.hostname.trim().is_empty() {
        return error_response("hostname is required", StatusCode::BAD_REQUEST);
    }
    match state.monitor.register(req) {
        Ok(node) => (StatusCode::CREATED, ApiResponse::ok(node)).into_response(),
        Err(e) => health_error(e),
    }
}

/// DELETE /api/v1/nodes/{id}
pub async fn deregister_node(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.monitor.deregister(&id) {
        Ok(()) => ApiResponse::ok("deregistered").into_response(),
        Err(e) => health_error(e),
    }
}

/// POST /api/v1/nodes/{id}/heartbeat
///
/// The body is optional; an empty object means "now, no allocation update".
pub async fn heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<Heartbeat>>,
) -> Response {
    let beat = body.map(|Json(b)| b).unwrap_or_default();
    match state.monitor.record_heartbeat(&id, beat) {
        Ok(node) => ApiResponse::ok(node).into_response(),
        Err(e) => health_error(e),
    }
}

/// POST /api/v1/nodes/{id}/cordon
pub async fn cordon_node(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.admin.cordon(&id).await {
        Ok(node) => ApiResponse::ok(node).into_response(),
        Err(e) => health_error(e),
    }
}

/// POST /api/v1/nodes/{id}/uncordon
pub async fn uncordon_node(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.admin.uncordon(&id).await {
        Ok(node) => ApiResponse::ok(node).into_response(),
        Err(e) => health_error(e),
    }
}

/// POST /api/v1/nodes/{id}/drain
pub async fn drain_node(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.admin.drain(&id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => health_error(e),
    }
}

// ── Instances ──────────────────────────────────────────────────

/// GET /api/v1/instances/{id}/status
pub async fn instance_status(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.reconciler.resolve_status(&id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(ReconcileError::InstanceNotFound(_)) => {
            error_response("instance not found", StatusCode::NOT_FOUND)
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Orphans ────────────────────────────────────────────────────

/// GET /api/v1/orphans
pub async fn list_orphans(State(state): State<ApiState>) -> Response {
    match state.orphans.find_orphans().await {
        Ok(orphans) => ApiResponse::ok(orphans).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::BAD_GATEWAY),
    }
}

/// Cleanup request body. Without a target every current orphan is cleaned.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    #[serde(default)]
    pub target: Option<Orphan>,
    #[serde(default)]
    pub confirm: bool,
}

/// POST /api/v1/orphans/cleanup
pub async fn cleanup_orphans(
    State(state): State<ApiState>,
    Json(req): Json<CleanupRequest>,
) -> Response {
    let result = match &req.target {
        Some(target) => state
            .orphans
            .cleanup(target, req.confirm)
            .await
            .map(|r| vec![r]),
        None => state.orphans.cleanup_all(req.confirm).await,
    };
    match result {
        Ok(results) => {
            if req.confirm {
                info!(count = results.len(), "orphan cleanup via api");
            }
            ApiResponse::ok(results).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::BAD_GATEWAY),
    }
}

// ── Subscriptions ──────────────────────────────────────────────

/// POST /api/v1/subscriptions/{id}/provision
pub async fn request_provisioning(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    match state.subscriptions.request_provisioning(&id) {
        Ok(Some(job)) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({
                "job_id": job.id,
                "run_at": job.run_at,
                "deduplicated": job.deduplicated,
            })),
        )
            .into_response(),
        Ok(None) => {
            warn!(subscription_id = %id, "provisioning request not queued");
            error_response("job queue unavailable", StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(e) => lifecycle_error(e),
    }
}

/// POST /api/v1/subscriptions/{id}/cancel
pub async fn cancel_subscription(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    match state.subscriptions.cancel(&id).await {
        Ok(sub) => ApiResponse::ok(sub).into_response(),
        Err(e) => lifecycle_error(e),
    }
}

// ── Queue ──────────────────────────────────────────────────────

/// GET /api/v1/queue/lanes
pub async fn lane_counts(State(state): State<ApiState>) -> Response {
    let mut counts: BTreeMap<&'static str, LaneCounts> = BTreeMap::new();
    for lane in Lane::ALL {
        match state.queue.lane_counts(lane) {
            Ok(c) => {
                counts.insert(lane.as_str(), c);
            }
            Err(e) => return error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE),
        }
    }
    ApiResponse::ok(counts).into_response()
}
