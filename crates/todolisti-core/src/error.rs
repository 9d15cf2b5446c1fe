//! Error types for todolisti-core

use thiserror::Error;

/// Result type alias using todolisti-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in todolisti-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity absent or not owned by the caller
    #[error("Not found: {0}")]
    NotFound(String),

    /// Acting user lacks the required permission level
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Operation not allowed in the entity's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invitation or other time-bound record has expired
    #[error("Expired: {0}")]
    Expired(String),

    /// Duplicate record or concurrent modification
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} {id}"))
    }
}
