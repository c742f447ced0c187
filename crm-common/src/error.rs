//! Common error types for the CRM engine

use thiserror::Error;

/// Common result type for CRM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the store, the engine services and the API layer
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode of a stored document failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested customer, note or source record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input (blank id, unknown axis, bad limit)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Write rejected because it contradicts stored state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for SQLite lock contention, which callers may retry
    pub fn is_database_locked(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("SQLITE_BUSY")
            }
            _ => false,
        }
    }
}
