//! Purge command implementation.

use crate::error::CliResult;
use fieldsync_engine::{Clock, MemoryStore, OutboxLog, RecordStore, SystemClock};
use fieldsync_protocol::{OutboxStatus, Timestamp};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Purge statistics.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct PurgeStats {
    /// Synced tombstones removed (or removable on a dry run).
    pub tombstones: usize,
    /// Completed outbox entries removed (or removable on a dry run).
    pub completed_entries: usize,
}

/// Runs the purge command.
pub fn run(path: &Path, retention: Duration, dry_run: bool) -> CliResult<()> {
    let store = MemoryStore::load_snapshot(path)?;

    println!("Purging {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }

    let stats = purge(&store, SystemClock.now(), retention, dry_run)?;
    println!("  Tombstones:        {}", stats.tombstones);
    println!("  Completed entries: {}", stats.completed_entries);

    if !dry_run && stats != PurgeStats::default() {
        store.save_snapshot(path)?;
        println!("✓ Purge complete");
    }
    Ok(())
}

/// Removes tombstones both sides have seen and completed outbox entries
/// older than `retention`.
pub fn purge(
    store: &MemoryStore,
    now: Timestamp,
    retention: Duration,
    dry_run: bool,
) -> CliResult<PurgeStats> {
    let cutoff = now.saturating_sub(retention);
    let mut stats = PurgeStats::default();

    for entity_type in store.entity_types() {
        stats.tombstones += if dry_run {
            store
                .list_records(&entity_type)?
                .iter()
                .filter(|r| r.is_purgeable())
                .count()
        } else {
            store.purge_tombstones(&entity_type)?
        };
    }

    stats.completed_entries = if dry_run {
        store
            .list_outbox_entries(Some(OutboxStatus::Completed))?
            .iter()
            .filter(|e| e.completed_at.is_some_and(|at| at < cutoff))
            .count()
    } else {
        store.purge_completed(cutoff)?
    };

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::{EntityType, OperationKind, OutboxEntry};

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let task: EntityType = "task".into();

        let gone = store
            .write_local(&task, "gone", vec![], true, Timestamp(10))
            .unwrap();
        store
            .compare_and_clear_dirty(
                &task,
                "gone",
                gone.updated_at,
                Timestamp(15),
                Timestamp(20),
            )
            .unwrap();
        store
            .write_local(&task, "unsynced", vec![], true, Timestamp(11))
            .unwrap();

        for completed_at in [1_000, 90_000] {
            let entry = OutboxEntry::new(
                "payment".into(),
                OperationKind::RemoteWrite,
                vec![],
                "buyer",
                Timestamp(1),
            );
            let entry_id = entry.entry_id;
            store.enqueue_outbox_entry(entry).unwrap();
            store
                .claim_outbox_entries(1, Timestamp(completed_at))
                .unwrap();
            store
                .complete_outbox_entry(entry_id, Timestamp(completed_at))
                .unwrap();
        }
        store
    }

    #[test]
    fn dry_run_counts_without_removing() {
        let store = seeded();
        let expected = PurgeStats {
            tombstones: 1,
            completed_entries: 1,
        };
        let retention = Duration::from_secs(60);

        assert_eq!(
            purge(&store, Timestamp(100_000), retention, true).unwrap(),
            expected
        );
        assert_eq!(store.list_records(&"task".into()).unwrap().len(), 2);

        assert_eq!(
            purge(&store, Timestamp(100_000), retention, false).unwrap(),
            expected
        );
        assert_eq!(store.list_records(&"task".into()).unwrap().len(), 1);
        assert_eq!(store.list_outbox_entries(None).unwrap().len(), 1);
    }
}
