//! Inspect command implementation.

use super::Format;
use crate::error::CliResult;
use fieldsync_engine::{CursorStore, MemoryStore, OutboxLog, RecordStore};
use fieldsync_protocol::{OutboxStatus, SyncableRecord, Timestamp};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// Per entity type state.
    pub entity_types: Vec<EntityTypeStats>,
    /// Outbox entry counts.
    pub outbox: OutboxCounts,
}

/// Sync state of one entity type.
#[derive(Debug, Serialize)]
pub struct EntityTypeStats {
    /// Entity type name.
    pub name: String,
    /// Live records.
    pub records: usize,
    /// Tombstones not yet purged.
    pub tombstones: usize,
    /// Records waiting to be pushed.
    pub dirty: usize,
    /// Records the remote rejected.
    pub rejected: usize,
    /// Pull watermark, if any pull succeeded.
    pub cursor: Option<Timestamp>,
    /// Record details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<RecordSummary>>,
}

/// One record's sync metadata.
#[derive(Debug, Serialize)]
pub struct RecordSummary {
    /// Record id.
    pub id: String,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Pending push.
    pub dirty: bool,
    /// Last acknowledged push.
    pub synced_at: Option<Timestamp>,
    /// Tombstone flag.
    pub is_deleted: bool,
    /// Rejection reason.
    pub sync_error: Option<String>,
    /// Payload size in bytes.
    pub payload_len: usize,
}

impl From<&SyncableRecord> for RecordSummary {
    fn from(record: &SyncableRecord) -> Self {
        Self {
            id: record.id.clone(),
            updated_at: record.updated_at,
            dirty: record.dirty,
            synced_at: record.synced_at,
            is_deleted: record.is_deleted,
            sync_error: record.sync_error.clone(),
            payload_len: record.payload.len(),
        }
    }
}

/// Outbox entries per status.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct OutboxCounts {
    /// Waiting to be claimed.
    pub pending: usize,
    /// Claimed by a drain pass.
    pub in_flight: usize,
    /// Delivered.
    pub completed: usize,
    /// Permanently failed.
    pub failed: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_records: bool, format: Format) -> CliResult<()> {
    let store = MemoryStore::load_snapshot(path)?;
    let result = inspect(&store, path, show_records)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

/// Collects the inspection result for a loaded store.
pub fn inspect(store: &MemoryStore, path: &Path, show_records: bool) -> CliResult<InspectResult> {
    let mut entity_types = Vec::new();
    for entity_type in store.entity_types() {
        let records = store.list_records(&entity_type)?;
        let cursor = store
            .get_cursor(&entity_type)?
            .map(|cursor| cursor.last_pulled_at);

        entity_types.push(EntityTypeStats {
            name: entity_type.to_string(),
            records: records.iter().filter(|r| !r.is_deleted).count(),
            tombstones: records.iter().filter(|r| r.is_deleted).count(),
            dirty: records.iter().filter(|r| r.is_push_eligible()).count(),
            rejected: records.iter().filter(|r| r.sync_error.is_some()).count(),
            cursor,
            details: show_records.then(|| records.iter().map(RecordSummary::from).collect()),
        });
    }

    let mut outbox = OutboxCounts::default();
    for entry in store.list_outbox_entries(None)? {
        match entry.status {
            OutboxStatus::Pending => outbox.pending += 1,
            OutboxStatus::InFlight => outbox.in_flight += 1,
            OutboxStatus::Completed => outbox.completed += 1,
            OutboxStatus::Failed => outbox.failed += 1,
        }
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        entity_types,
        outbox,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("FieldSync Store Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!();

    if result.entity_types.is_empty() {
        println!("No entity types.");
    }
    for stats in &result.entity_types {
        println!("{}:", stats.name);
        println!("  Records:    {}", stats.records);
        println!("  Tombstones: {}", stats.tombstones);
        println!("  Dirty:      {}", stats.dirty);
        println!("  Rejected:   {}", stats.rejected);
        match stats.cursor {
            Some(cursor) => println!("  Cursor:     {cursor}"),
            None => println!("  Cursor:     (never pulled)"),
        }
        if let Some(details) = &stats.details {
            for record in details {
                let mut flags = Vec::new();
                if record.dirty {
                    flags.push("dirty");
                }
                if record.is_deleted {
                    flags.push("deleted");
                }
                if record.sync_error.is_some() {
                    flags.push("rejected");
                }
                println!(
                    "    {:<24} updated={} synced={} [{}]",
                    record.id,
                    record.updated_at,
                    record
                        .synced_at
                        .map_or_else(|| "-".to_string(), |t| t.to_string()),
                    flags.join(",")
                );
            }
        }
        println!();
    }

    println!("Outbox:");
    println!("  Pending:   {}", result.outbox.pending);
    println!("  In flight: {}", result.outbox.in_flight);
    println!("  Completed: {}", result.outbox.completed);
    println!("  Failed:    {}", result.outbox.failed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::{OperationKind, OutboxEntry};

    #[test]
    fn counts_records_by_state() {
        let store = MemoryStore::new();
        let task = "task".into();
        store
            .write_local(&task, "a", vec![1], false, Timestamp(10))
            .unwrap();
        store
            .write_local(&task, "b", vec![2], false, Timestamp(11))
            .unwrap();
        store
            .write_local(&task, "c", vec![], true, Timestamp(12))
            .unwrap();
        store
            .mark_rejected(&task, "b", Timestamp(11), "title required")
            .unwrap();
        store.advance_cursor(&task, Timestamp(9)).unwrap();
        store
            .enqueue_outbox_entry(OutboxEntry::new(
                "payment".into(),
                OperationKind::RemoteWrite,
                vec![],
                "buyer",
                Timestamp(1),
            ))
            .unwrap();

        let result = inspect(&store, Path::new("store.snap"), true).unwrap();
        let stats = &result.entity_types[0];
        assert_eq!(stats.name, "task");
        assert_eq!(stats.records, 2);
        assert_eq!(stats.tombstones, 1);
        assert_eq!(stats.dirty, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.cursor, Some(Timestamp(9)));
        assert_eq!(stats.details.as_ref().unwrap().len(), 3);
        assert_eq!(
            result.outbox,
            OutboxCounts {
                pending: 1,
                ..OutboxCounts::default()
            }
        );
    }
}
