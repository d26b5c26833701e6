//! Platform error types.

use thiserror::Error;

/// Errors surfaced by a [`PlatformClient`](crate::PlatformClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The control plane could not be reached at all.
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Connectivity failures flip the facade's readiness flag.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;
