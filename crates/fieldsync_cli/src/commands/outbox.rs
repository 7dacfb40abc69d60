//! Outbox listing command.

use super::Format;
use crate::error::CliResult;
use fieldsync_engine::{MemoryStore, OutboxLog};
use fieldsync_protocol::{OutboxEntry, OutboxStatus, Timestamp};
use serde::Serialize;
use std::path::Path;

/// One outbox entry as printed by the CLI.
#[derive(Debug, Serialize)]
pub struct EntrySummary {
    /// Entry id.
    pub entry_id: String,
    /// Entity type.
    pub entity_type: String,
    /// Operation kind.
    pub kind: String,
    /// Current status.
    pub status: String,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Creation time.
    pub created_at: Timestamp,
    /// Earliest next attempt.
    pub next_attempt_at: Option<Timestamp>,
    /// Last failure.
    pub last_error: Option<String>,
    /// Idempotency token.
    pub token: String,
}

impl From<&OutboxEntry> for EntrySummary {
    fn from(entry: &OutboxEntry) -> Self {
        Self {
            entry_id: entry.entry_id.to_string(),
            entity_type: entry.entity_type.to_string(),
            kind: entry.kind.to_string(),
            status: entry.status.to_string(),
            retry_count: entry.retry_count,
            created_at: entry.created_at,
            next_attempt_at: entry.next_attempt_at,
            last_error: entry.last_error.clone(),
            token: entry.idempotency_token.to_string(),
        }
    }
}

/// Runs the outbox command.
pub fn run(path: &Path, status: Option<OutboxStatus>, format: Format) -> CliResult<()> {
    let store = MemoryStore::load_snapshot(path)?;
    let entries = list(&store, status)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        Format::Text => {
            if entries.is_empty() {
                println!("No outbox entries.");
            }
            for entry in &entries {
                println!(
                    "{}  {:<10} {:<14} {:<12} retries={}",
                    entry.entry_id, entry.status, entry.kind, entry.entity_type, entry.retry_count
                );
                if let Some(next) = entry.next_attempt_at {
                    println!("    next attempt at {next}");
                }
                if let Some(error) = &entry.last_error {
                    println!("    last error: {error}");
                }
            }
        }
    }
    Ok(())
}

/// Lists entries oldest first, optionally filtered by status.
pub fn list(store: &MemoryStore, status: Option<OutboxStatus>) -> CliResult<Vec<EntrySummary>> {
    let mut entries = store.list_outbox_entries(status)?;
    entries.sort_by_key(|entry| entry.created_at);
    Ok(entries.iter().map(EntrySummary::from).collect())
}
