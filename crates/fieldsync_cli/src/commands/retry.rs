//! Retry command implementation.

use crate::error::{CliError, CliResult};
use fieldsync_engine::{MemoryStore, OutboxLog, RecordStore};
use fieldsync_protocol::EntityType;
use std::path::Path;
use uuid::Uuid;

/// What a retry request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryTarget {
    /// A `FAILED` outbox entry.
    Entry(Uuid),
    /// A rejected record.
    Record(EntityType, String),
}

impl RetryTarget {
    /// Builds a target from the `--entry` and `--record` flags.
    pub fn from_args(entry: Option<&str>, record: Option<&str>) -> CliResult<Self> {
        match (entry, record) {
            (Some(entry), None) => Uuid::parse_str(entry)
                .map(RetryTarget::Entry)
                .map_err(|e| CliError::InvalidArgument(format!("bad entry id {entry:?}: {e}"))),
            (None, Some(record)) => match record.split_once(':') {
                Some((entity_type, id)) if !entity_type.is_empty() && !id.is_empty() => Ok(
                    RetryTarget::Record(EntityType::new(entity_type), id.to_string()),
                ),
                _ => Err(CliError::InvalidArgument(format!(
                    "record must be type:id, got {record:?}"
                ))),
            },
            _ => Err(CliError::InvalidArgument(
                "exactly one of --entry or --record is required".into(),
            )),
        }
    }
}

/// Runs the retry command.
pub fn run(path: &Path, entry: Option<&str>, record: Option<&str>) -> CliResult<()> {
    let target = RetryTarget::from_args(entry, record)?;
    let store = MemoryStore::load_snapshot(path)?;

    if retry(&store, &target)? {
        store.save_snapshot(path)?;
        match &target {
            RetryTarget::Entry(id) => println!("Outbox entry {id} re-armed"),
            RetryTarget::Record(entity_type, id) => {
                println!("Record {entity_type}:{id} will be pushed on the next sync");
            }
        }
    } else {
        println!("Nothing to retry: record has no rejection");
    }
    Ok(())
}

/// Applies the retry. Returns false if the record was not rejected.
pub fn retry(store: &MemoryStore, target: &RetryTarget) -> CliResult<bool> {
    match target {
        RetryTarget::Entry(entry_id) => {
            store.rearm_outbox_entry(*entry_id)?;
            Ok(true)
        }
        RetryTarget::Record(entity_type, id) => Ok(store.clear_rejection(entity_type, id)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::{OperationKind, OutboxEntry, OutboxStatus, Timestamp};

    #[test]
    fn parses_targets() {
        let id = Uuid::new_v4();
        assert_eq!(
            RetryTarget::from_args(Some(&id.to_string()), None).unwrap(),
            RetryTarget::Entry(id)
        );
        assert_eq!(
            RetryTarget::from_args(None, Some("task:a:1")).unwrap(),
            RetryTarget::Record("task".into(), "a:1".into())
        );
        assert!(RetryTarget::from_args(None, Some("task")).is_err());
        assert!(RetryTarget::from_args(Some("not-a-uuid"), None).is_err());
        assert!(RetryTarget::from_args(None, None).is_err());
    }

    #[test]
    fn rearms_failed_entry_and_rejected_record() {
        let store = MemoryStore::new();
        let entry = OutboxEntry::new(
            "payment".into(),
            OperationKind::RemoteWrite,
            vec![],
            "buyer",
            Timestamp(1),
        );
        let entry_id = entry.entry_id;
        store.enqueue_outbox_entry(entry).unwrap();
        store.claim_outbox_entries(1, Timestamp(2)).unwrap();
        store.fail_outbox_entry(entry_id, "card declined").unwrap();

        assert!(retry(&store, &RetryTarget::Entry(entry_id)).unwrap());
        let entry = store.get_outbox_entry(entry_id).unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.retry_count, 0);

        let task: EntityType = "task".into();
        store
            .write_local(&task, "a", vec![1], false, Timestamp(5))
            .unwrap();
        let target = RetryTarget::Record(task.clone(), "a".into());
        assert!(!retry(&store, &target).unwrap());

        store.mark_rejected(&task, "a", Timestamp(5), "bad").unwrap();
        assert!(retry(&store, &target).unwrap());
        assert!(store.get_record(&task, "a").unwrap().unwrap().is_push_eligible());
    }

    #[test]
    fn pending_entry_cannot_be_rearmed() {
        let store = MemoryStore::new();
        let entry = OutboxEntry::new(
            "payment".into(),
            OperationKind::RemoteWrite,
            vec![],
            "buyer",
            Timestamp(1),
        );
        let entry_id = entry.entry_id;
        store.enqueue_outbox_entry(entry).unwrap();
        assert!(retry(&store, &RetryTarget::Entry(entry_id)).is_err());
    }
}
