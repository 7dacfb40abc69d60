//! CLI error type.

use fieldsync_engine::{StoreError, SyncError};
use fieldsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors a CLI command can report.
#[derive(Error, Debug)]
pub enum CliError {
    /// A store path is required for this command.
    #[error("store snapshot path required for {0} (use --store)")]
    MissingStore(&'static str),

    /// Bad command-line argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Snapshot could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Payload encoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Sync failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// JSON output failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime setup failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
