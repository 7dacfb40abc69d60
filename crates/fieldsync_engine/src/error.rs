//! Error types for the sync engine.

use fieldsync_protocol::{EntityType, ProtocolError};
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote store failed internally (5xx).
    #[error("server error: {0}")]
    ServerError(String),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Encoding or lifecycle error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The entity type was never registered with the orchestrator.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(EntityType),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A network call exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// A background sync task panicked or was aborted.
    #[error("sync task failed: {0}")]
    TaskFailed(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error is transient and the work should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            SyncError::NotConnected => true,
            _ => false,
        }
    }
}

/// Errors raised by a local store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The record does not exist.
    #[error("record {id} not found in {entity_type}")]
    RecordNotFound {
        /// Entity type.
        entity_type: EntityType,
        /// Record id.
        id: String,
    },

    /// The outbox entry does not exist.
    #[error("outbox entry {0} not found")]
    EntryNotFound(Uuid),

    /// Invalid outbox transition or codec failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Snapshot file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot contents are unusable.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::ServerError("internal error".into()).is_retryable());
        assert!(SyncError::NotConnected.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::UnknownEntityType("order".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to server");

        let err: SyncError = StoreError::RecordNotFound {
            entity_type: "task".into(),
            id: "task-1".into(),
        }
        .into();
        assert!(err.to_string().contains("task-1"));
        assert!(!err.is_retryable());
    }
}
