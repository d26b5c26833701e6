//! Orchestrator error types.

use thiserror::Error;

use dockyard_state::SubscriptionStatus;

use crate::manifest::ManifestError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("catalog entry not found: {0}")]
    ServiceNotFound(String),

    #[error("quota exhausted for service {0}")]
    QuotaExceeded(String),

    #[error("subscription {id} is {status:?}, not provisionable")]
    NotProvisionable {
        id: String,
        status: SubscriptionStatus,
    },

    #[error("instance {0} is deleted")]
    InstanceDeleted(String),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("platform error: {0}")]
    Platform(#[from] dockyard_platform::PlatformError),

    #[error("state store error: {0}")]
    State(#[from] dockyard_state::StateError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
