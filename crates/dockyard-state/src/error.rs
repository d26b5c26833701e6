//! Store errors. Each variant names the redb stage or the record that failed.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    /// A stored value no longer decodes as its entity type.
    #[error("corrupt record {table}/{key}: {reason}")]
    Corrupt {
        table: String,
        key: String,
        reason: String,
    },
}

impl StateError {
    pub(crate) fn corrupt(table: &str, key: &str, err: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            table: table.to_string(),
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}
