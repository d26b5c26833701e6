//! Health monitor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node {0} is already registered")]
    AlreadyRegistered(String),

    #[error("platform error: {0}")]
    Platform(#[from] dockyard_platform::PlatformError),

    #[error("state store error: {0}")]
    State(#[from] dockyard_state::StateError),
}

pub type HealthResult<T> = Result<T, HealthError>;
