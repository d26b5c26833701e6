//! Orphan detector error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrphanError {
    #[error("platform error: {0}")]
    Platform(#[from] dockyard_platform::PlatformError),

    #[error("state store error: {0}")]
    State(#[from] dockyard_state::StateError),
}

pub type OrphanResult<T> = Result<T, OrphanError>;
