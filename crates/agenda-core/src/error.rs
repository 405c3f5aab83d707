//! Error types for agenda-core

use thiserror::Error;

/// Result type alias using agenda-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in agenda-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Event not found (or not owned by the caller)
    #[error("Event not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote API error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Local persistence could not take the mutation
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Failures talking to the agenda API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Server unreachable: {0}")]
    Unreachable(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Remote event not found")]
    NotFound,
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Server error: {0}")]
    Server(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Connectivity-class failures: the mutation should stay queued and be retried.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Timeout | Self::Server(_) | Self::Unauthorized(_)
        )
    }
}

impl Error {
    /// Whether this error came from a remote call that may succeed later.
    pub const fn is_transient_remote(&self) -> bool {
        match self {
            Self::Remote(error) => error.is_transient(),
            _ => false,
        }
    }
}
