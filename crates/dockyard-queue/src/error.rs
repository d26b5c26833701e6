//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store could not be read or written.
    #[error("queue backend unavailable: {0}")]
    Backend(String),

    #[error("unknown lane: {0}")]
    UnknownLane(String),

    #[error("state store error: {0}")]
    State(#[from] dockyard_state::StateError),
}

pub type QueueResult<T> = Result<T, QueueError>;
