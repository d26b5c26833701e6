//! Reconciler error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("platform error: {0}")]
    Platform(#[from] dockyard_platform::PlatformError),

    #[error("state store error: {0}")]
    State(#[from] dockyard_state::StateError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
