//! Error types for the reference server.

use fieldsync_engine::SyncError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors the reference server can raise.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Malformed request (4xx).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The server cannot be reached.
    #[error("server unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (5xx).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServerError::InvalidRequest(_))
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }
}

impl From<ServerError> for SyncError {
    fn from(error: ServerError) -> Self {
        match error {
            ServerError::InvalidRequest(message) => SyncError::transport_fatal(message),
            ServerError::Unavailable(message) => SyncError::transport_retryable(message),
            ServerError::Internal(message) => SyncError::ServerError(message),
        }
    }
}
