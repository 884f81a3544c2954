//! Database error types

use agentmart_types::AgentMartError;
use thiserror::Error;

/// Database operation errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<DbError> for AgentMartError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::InvalidConfig(reason) => AgentMartError::InvalidConfig { reason },
            other => AgentMartError::Storage {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;
