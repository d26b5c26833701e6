//! Lifecycle error types.

use thiserror::Error;

use dockyard_state::SubscriptionStatus;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("subscription {id} is {status:?}")]
    InvalidTransition {
        id: String,
        status: SubscriptionStatus,
    },

    #[error("platform unavailable: {0}")]
    PlatformUnavailable(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] dockyard_orchestrator::OrchestratorError),

    #[error("reconciler error: {0}")]
    Reconcile(#[from] dockyard_reconciler::ReconcileError),

    #[error("orphan detector error: {0}")]
    Orphan(#[from] dockyard_orphan::OrphanError),

    #[error("state store error: {0}")]
    State(#[from] dockyard_state::StateError),

    #[error("configuration error: {0}")]
    Config(#[from] dockyard_core::ConfigError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
