//! CLI command implementations.

pub mod inspect;
pub mod outbox;
pub mod purge;
pub mod resync;
pub mod retry;
pub mod simulate;

use crate::error::{CliError, CliResult};
use fieldsync_protocol::OutboxStatus;

/// Output format shared by the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses `text` or `json`.
    pub fn parse(value: &str) -> CliResult<Self> {
        match value {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(CliError::InvalidArgument(format!(
                "unknown format {other:?}, expected text or json"
            ))),
        }
    }
}

/// Parses an outbox status name as printed by `outbox`.
pub fn parse_status(value: &str) -> CliResult<OutboxStatus> {
    match value.to_ascii_lowercase().as_str() {
        "pending" => Ok(OutboxStatus::Pending),
        "in_flight" | "in-flight" => Ok(OutboxStatus::InFlight),
        "completed" => Ok(OutboxStatus::Completed),
        "failed" => Ok(OutboxStatus::Failed),
        other => Err(CliError::InvalidArgument(format!(
            "unknown outbox status {other:?}"
        ))),
    }
}
