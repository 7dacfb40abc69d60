//! In-memory local store with durable snapshots.
//!
//! `MemoryStore` implements every local store trait behind one
//! `parking_lot::RwLock`. Each trait method takes the lock once, so each
//! method is an atomic step, and no lock is ever held across an `.await`.
//!
//! Snapshots persist the record tables, the cursor table and the outbox table
//! as a single CBOR document, written to a temporary file and renamed into
//! place.

use crate::error::{StoreError, StoreResult};
use crate::store::{CursorStore, MergeOutcome, OutboxLog, RecordStore, Resolver};
use fieldsync_protocol::{
    decode, encode, DirtyRef, EntityType, OutboxEntry, OutboxStatus, SyncCursor, SyncableRecord,
    Timestamp,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Default)]
struct StoreState {
    records: BTreeMap<EntityType, BTreeMap<String, SyncableRecord>>,
    cursors: BTreeMap<EntityType, SyncCursor>,
    outbox: BTreeMap<Uuid, OutboxEntry>,
}

impl StoreState {
    fn outbox_entry_mut(&mut self, entry_id: Uuid) -> StoreResult<&mut OutboxEntry> {
        self.outbox
            .get_mut(&entry_id)
            .ok_or(StoreError::EntryNotFound(entry_id))
    }
}

/// Flat table layout written to disk.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u16,
    records: Vec<SyncableRecord>,
    cursors: Vec<SyncCursor>,
    outbox: Vec<OutboxEntry>,
}

impl Snapshot {
    fn capture(state: &StoreState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            records: state
                .records
                .values()
                .flat_map(|table| table.values().cloned())
                .collect(),
            cursors: state.cursors.values().cloned().collect(),
            outbox: state.outbox.values().cloned().collect(),
        }
    }

    fn into_state(self) -> StoreState {
        let mut state = StoreState::default();
        for record in self.records {
            state
                .records
                .entry(record.entity_type.clone())
                .or_default()
                .insert(record.id.clone(), record);
        }
        for cursor in self.cursors {
            state.cursors.insert(cursor.entity_type.clone(), cursor);
        }
        for entry in self.outbox {
            state.outbox.insert(entry.entry_id, entry);
        }
        state
    }
}

/// A local store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a store from a snapshot file.
    pub fn load_snapshot(path: impl AsRef<Path>) -> StoreResult<Self> {
        let bytes = fs::read(path.as_ref())?;
        let snapshot: Snapshot = decode(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::InvalidSnapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Self {
            state: RwLock::new(snapshot.into_state()),
        })
    }

    /// Writes the whole store to `path` atomically.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let bytes = encode(&Snapshot::capture(&self.state.read()))?;

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        debug!(path = %path.display(), bytes = bytes.len(), "saved store snapshot");
        Ok(())
    }

    /// Returns the entity types that have at least one record or cursor.
    pub fn entity_types(&self) -> Vec<EntityType> {
        let state = self.state.read();
        let mut types: Vec<EntityType> = state
            .records
            .keys()
            .chain(state.cursors.keys())
            .cloned()
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

impl RecordStore for MemoryStore {
    fn write_local(
        &self,
        entity_type: &EntityType,
        id: &str,
        payload: Vec<u8>,
        is_deleted: bool,
        now: Timestamp,
    ) -> StoreResult<SyncableRecord> {
        let mut state = self.state.write();
        let table = state.records.entry(entity_type.clone()).or_default();

        let record = match table.get_mut(id) {
            Some(existing) => {
                existing.updated_at = now.max(existing.updated_at.next());
                existing.payload = payload;
                existing.is_deleted = is_deleted;
                existing.dirty = true;
                existing.sync_error = None;
                existing.clone()
            }
            None => {
                let mut record = SyncableRecord::local(entity_type.clone(), id, payload, now);
                record.is_deleted = is_deleted;
                table.insert(id.to_string(), record.clone());
                record
            }
        };
        Ok(record)
    }

    fn get_record(&self, entity_type: &EntityType, id: &str) -> StoreResult<Option<SyncableRecord>> {
        Ok(self
            .state
            .read()
            .records
            .get(entity_type)
            .and_then(|table| table.get(id))
            .cloned())
    }

    fn list_records(&self, entity_type: &EntityType) -> StoreResult<Vec<SyncableRecord>> {
        Ok(self
            .state
            .read()
            .records
            .get(entity_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    fn list_dirty(&self, entity_type: &EntityType, limit: usize) -> StoreResult<Vec<DirtyRef>> {
        let state = self.state.read();
        let Some(table) = state.records.get(entity_type) else {
            return Ok(Vec::new());
        };

        let mut dirty: Vec<DirtyRef> = table
            .values()
            .filter(|r| r.is_push_eligible())
            .map(SyncableRecord::dirty_ref)
            .collect();
        dirty.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        dirty.truncate(limit);
        Ok(dirty)
    }

    fn fetch_dirty(
        &self,
        entity_type: &EntityType,
        refs: &[DirtyRef],
    ) -> StoreResult<Vec<SyncableRecord>> {
        let state = self.state.read();
        let Some(table) = state.records.get(entity_type) else {
            return Ok(Vec::new());
        };

        Ok(refs
            .iter()
            .filter_map(|r| table.get(&r.id))
            .filter(|r| r.is_push_eligible())
            .cloned()
            .collect())
    }

    fn compare_and_clear_dirty(
        &self,
        entity_type: &EntityType,
        id: &str,
        expected_updated_at: Timestamp,
        confirmed_updated_at: Timestamp,
        synced_at: Timestamp,
    ) -> StoreResult<bool> {
        let mut state = self.state.write();
        let record = state
            .records
            .get_mut(entity_type)
            .and_then(|table| table.get_mut(id))
            .ok_or_else(|| StoreError::RecordNotFound {
                entity_type: entity_type.clone(),
                id: id.to_string(),
            })?;

        if record.updated_at != expected_updated_at || !record.dirty {
            return Ok(false);
        }

        record.updated_at = confirmed_updated_at;
        record.dirty = false;
        record.sync_error = None;
        record.synced_at = Some(record.synced_at.map_or(synced_at, |prev| prev.max(synced_at)));
        Ok(true)
    }

    fn mark_rejected(
        &self,
        entity_type: &EntityType,
        id: &str,
        expected_updated_at: Timestamp,
        reason: &str,
    ) -> StoreResult<bool> {
        let mut state = self.state.write();
        let Some(record) = state
            .records
            .get_mut(entity_type)
            .and_then(|table| table.get_mut(id))
        else {
            return Ok(false);
        };

        if record.updated_at != expected_updated_at || !record.dirty {
            return Ok(false);
        }
        record.sync_error = Some(reason.to_string());
        Ok(true)
    }

    fn clear_rejection(&self, entity_type: &EntityType, id: &str) -> StoreResult<bool> {
        let mut state = self.state.write();
        let record = state
            .records
            .get_mut(entity_type)
            .and_then(|table| table.get_mut(id))
            .ok_or_else(|| StoreError::RecordNotFound {
                entity_type: entity_type.clone(),
                id: id.to_string(),
            })?;
        Ok(record.sync_error.take().is_some())
    }

    fn rejected_records(&self, entity_type: &EntityType) -> StoreResult<Vec<SyncableRecord>> {
        Ok(self
            .state
            .read()
            .records
            .get(entity_type)
            .map(|table| {
                table
                    .values()
                    .filter(|r| r.dirty && r.sync_error.is_some())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn upsert_from_remote(
        &self,
        entity_type: &EntityType,
        records: &[SyncableRecord],
        synced_at: Timestamp,
        resolver: &Resolver,
    ) -> StoreResult<MergeOutcome> {
        let mut state = self.state.write();
        let table = state.records.entry(entity_type.clone()).or_default();
        let mut outcome = MergeOutcome::default();

        for remote in records {
            let local = table.get(&remote.id);
            let decision = resolver(local, remote);

            if !decision.accepts_remote() {
                if decision.is_conflict() {
                    outcome.kept_dirty += 1;
                } else {
                    outcome.kept_newer += 1;
                }
                continue;
            }

            let previous_synced = local.and_then(|l| l.synced_at);
            let mut incoming = remote.clone();
            incoming.entity_type = entity_type.clone();
            incoming.dirty = false;
            incoming.sync_error = None;
            incoming.synced_at = Some(previous_synced.map_or(synced_at, |prev| prev.max(synced_at)));
            table.insert(incoming.id.clone(), incoming);
            outcome.applied += 1;
        }

        Ok(outcome)
    }

    fn pending_count(&self, entity_type: &EntityType) -> StoreResult<usize> {
        Ok(self
            .state
            .read()
            .records
            .get(entity_type)
            .map(|table| table.values().filter(|r| r.dirty).count())
            .unwrap_or(0))
    }

    fn purge_tombstones(&self, entity_type: &EntityType) -> StoreResult<usize> {
        let mut state = self.state.write();
        let Some(table) = state.records.get_mut(entity_type) else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|_, r| !r.is_purgeable());
        Ok(before - table.len())
    }
}

impl CursorStore for MemoryStore {
    fn get_cursor(&self, entity_type: &EntityType) -> StoreResult<Option<SyncCursor>> {
        Ok(self.state.read().cursors.get(entity_type).cloned())
    }

    fn advance_cursor(
        &self,
        entity_type: &EntityType,
        observed: Timestamp,
    ) -> StoreResult<Timestamp> {
        let mut state = self.state.write();
        let cursor = state
            .cursors
            .entry(entity_type.clone())
            .or_insert_with(|| SyncCursor::new(entity_type.clone(), Timestamp::ZERO));
        cursor.advance(observed);
        Ok(cursor.last_pulled_at)
    }

    fn reset_cursor(&self, entity_type: &EntityType) -> StoreResult<()> {
        self.state.write().cursors.remove(entity_type);
        Ok(())
    }

    fn list_cursors(&self) -> StoreResult<Vec<SyncCursor>> {
        Ok(self.state.read().cursors.values().cloned().collect())
    }
}

impl OutboxLog for MemoryStore {
    fn enqueue_outbox_entry(&self, entry: OutboxEntry) -> StoreResult<()> {
        self.state.write().outbox.insert(entry.entry_id, entry);
        Ok(())
    }

    fn get_outbox_entry(&self, entry_id: Uuid) -> StoreResult<Option<OutboxEntry>> {
        Ok(self.state.read().outbox.get(&entry_id).cloned())
    }

    fn list_outbox_entries(&self, status: Option<OutboxStatus>) -> StoreResult<Vec<OutboxEntry>> {
        let state = self.state.read();
        let mut entries: Vec<OutboxEntry> = state
            .outbox
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        Ok(entries)
    }

    fn claim_outbox_entries(&self, limit: usize, now: Timestamp) -> StoreResult<Vec<OutboxEntry>> {
        let mut state = self.state.write();

        let mut candidates: Vec<(Timestamp, Uuid)> = state
            .outbox
            .values()
            .filter(|e| e.is_claimable(now))
            .map(|e| (e.created_at, e.entry_id))
            .collect();
        candidates.sort();
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, entry_id) in candidates {
            let entry = state.outbox_entry_mut(entry_id)?;
            entry.claim(now)?;
            claimed.push(entry.clone());
        }
        Ok(claimed)
    }

    fn complete_outbox_entry(&self, entry_id: Uuid, now: Timestamp) -> StoreResult<()> {
        let mut state = self.state.write();
        state.outbox_entry_mut(entry_id)?.complete(now)?;
        Ok(())
    }

    fn requeue_outbox_entry(
        &self,
        entry_id: Uuid,
        next_attempt_at: Timestamp,
        error: Option<String>,
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        state
            .outbox_entry_mut(entry_id)?
            .requeue(next_attempt_at, error)?;
        Ok(())
    }

    fn fail_outbox_entry(&self, entry_id: Uuid, reason: &str) -> StoreResult<()> {
        let mut state = self.state.write();
        state.outbox_entry_mut(entry_id)?.fail(reason)?;
        Ok(())
    }

    fn rearm_outbox_entry(&self, entry_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write();
        state.outbox_entry_mut(entry_id)?.rearm()?;
        Ok(())
    }

    fn recover_stale_in_flight(&self, claimed_before: Timestamp) -> StoreResult<usize> {
        let mut state = self.state.write();
        let mut recovered = 0;
        for entry in state.outbox.values_mut() {
            let stale = entry.status == OutboxStatus::InFlight
                && entry.last_attempt_at.map_or(true, |at| at < claimed_before);
            if stale {
                entry.requeue(claimed_before, Some("claim abandoned".into()))?;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    fn purge_completed(&self, completed_before: Timestamp) -> StoreResult<usize> {
        let mut state = self.state.write();
        let before = state.outbox.len();
        state.outbox.retain(|_, e| {
            !(e.status == OutboxStatus::Completed
                && e.completed_at.map_or(false, |at| at < completed_before))
        });
        Ok(before - state.outbox.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_protocol::{resolve, OperationKind};

    fn task() -> EntityType {
        EntityType::new("task")
    }

    fn remote(id: &str, updated_at: u64, payload: u8) -> SyncableRecord {
        SyncableRecord::remote(task(), id, vec![payload], Timestamp(updated_at))
    }

    #[test]
    fn write_local_marks_dirty_and_advances() {
        let store = MemoryStore::new();
        let first = store
            .write_local(&task(), "task-1", vec![1], false, Timestamp(100))
            .unwrap();
        assert!(first.dirty);
        assert_eq!(first.updated_at, Timestamp(100));

        // Same wall-clock millisecond still produces a newer version
        let second = store
            .write_local(&task(), "task-1", vec![2], false, Timestamp(100))
            .unwrap();
        assert_eq!(second.updated_at, Timestamp(101));
        assert_eq!(store.pending_count(&task()).unwrap(), 1);
    }

    #[test]
    fn compare_and_clear_requires_unchanged_version() {
        let store = MemoryStore::new();
        store
            .write_local(&task(), "msg-1", vec![1], false, Timestamp(5))
            .unwrap();
        store
            .write_local(&task(), "msg-1", vec![2], false, Timestamp(6))
            .unwrap();

        let cleared = store
            .compare_and_clear_dirty(&task(), "msg-1", Timestamp(5), Timestamp(5), Timestamp(7))
            .unwrap();
        assert!(!cleared);
        assert!(store.get_record(&task(), "msg-1").unwrap().unwrap().dirty);

        let cleared = store
            .compare_and_clear_dirty(&task(), "msg-1", Timestamp(6), Timestamp(900), Timestamp(7))
            .unwrap();
        assert!(cleared);
        let record = store.get_record(&task(), "msg-1").unwrap().unwrap();
        assert!(!record.dirty);
        assert_eq!(record.updated_at, Timestamp(900));
        assert_eq!(record.synced_at, Some(Timestamp(7)));
    }

    #[test]
    fn synced_at_never_decreases() {
        let store = MemoryStore::new();
        store
            .write_local(&task(), "a", vec![1], false, Timestamp(5))
            .unwrap();
        store
            .compare_and_clear_dirty(&task(), "a", Timestamp(5), Timestamp(5), Timestamp(50))
            .unwrap();
        let rewritten = store
            .write_local(&task(), "a", vec![2], false, Timestamp(6))
            .unwrap();
        store
            .compare_and_clear_dirty(
                &task(),
                "a",
                rewritten.updated_at,
                rewritten.updated_at,
                Timestamp(20),
            )
            .unwrap();

        let record = store.get_record(&task(), "a").unwrap().unwrap();
        assert_eq!(record.synced_at, Some(Timestamp(50)));
    }

    #[test]
    fn rejected_records_leave_the_dirty_list() {
        let store = MemoryStore::new();
        store
            .write_local(&task(), "task-1", vec![1], false, Timestamp(100))
            .unwrap();
        store
            .write_local(&task(), "task-2", vec![1], false, Timestamp(101))
            .unwrap();

        assert!(store
            .mark_rejected(&task(), "task-1", Timestamp(100), "missing farm")
            .unwrap());

        let dirty = store.list_dirty(&task(), 10).unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].id, "task-2");
        assert_eq!(store.rejected_records(&task()).unwrap().len(), 1);
        assert_eq!(store.pending_count(&task()).unwrap(), 2);

        assert!(store.clear_rejection(&task(), "task-1").unwrap());
        assert_eq!(store.list_dirty(&task(), 10).unwrap().len(), 2);
    }

    #[test]
    fn rewriting_a_rejected_record_makes_it_eligible() {
        let store = MemoryStore::new();
        store
            .write_local(&task(), "task-1", vec![1], false, Timestamp(100))
            .unwrap();
        store
            .mark_rejected(&task(), "task-1", Timestamp(100), "bad")
            .unwrap();
        store
            .write_local(&task(), "task-1", vec![2], false, Timestamp(110))
            .unwrap();
        assert_eq!(store.list_dirty(&task(), 10).unwrap().len(), 1);
    }

    #[test]
    fn list_dirty_is_oldest_first_and_bounded() {
        let store = MemoryStore::new();
        for (id, ts) in [("c", 30), ("a", 10), ("b", 20)] {
            store
                .write_local(&task(), id, vec![], false, Timestamp(ts))
                .unwrap();
        }
        let dirty = store.list_dirty(&task(), 2).unwrap();
        let ids: Vec<_> = dirty.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn upsert_from_remote_respects_dirty_local() {
        let store = MemoryStore::new();
        store
            .write_local(&task(), "a", vec![1], false, Timestamp(10))
            .unwrap();

        let outcome = store
            .upsert_from_remote(
                &task(),
                &[remote("a", 20, 9), remote("b", 20, 9)],
                Timestamp(25),
                &resolve,
            )
            .unwrap();

        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.kept_dirty, 1);
        assert_eq!(
            store.get_record(&task(), "a").unwrap().unwrap().payload,
            vec![1]
        );
        let b = store.get_record(&task(), "b").unwrap().unwrap();
        assert!(!b.dirty);
        assert_eq!(b.synced_at, Some(Timestamp(25)));
    }

    #[test]
    fn cursor_is_monotonic_until_reset() {
        let store = MemoryStore::new();
        assert!(store.get_cursor(&task()).unwrap().is_none());

        assert_eq!(
            store.advance_cursor(&task(), Timestamp(50)).unwrap(),
            Timestamp(50)
        );
        assert_eq!(
            store.advance_cursor(&task(), Timestamp(20)).unwrap(),
            Timestamp(50)
        );

        store.reset_cursor(&task()).unwrap();
        assert!(store.get_cursor(&task()).unwrap().is_none());
    }

    #[test]
    fn tombstones_are_purged_once_synced() {
        let store = MemoryStore::new();
        let tomb = store
            .write_local(&task(), "a", vec![], true, Timestamp(10))
            .unwrap();
        assert_eq!(store.purge_tombstones(&task()).unwrap(), 0);

        store
            .compare_and_clear_dirty(&task(), "a", tomb.updated_at, tomb.updated_at, Timestamp(12))
            .unwrap();
        assert_eq!(store.purge_tombstones(&task()).unwrap(), 1);
        assert!(store.get_record(&task(), "a").unwrap().is_none());
    }

    #[test]
    fn remote_tombstone_purges_when_server_clock_is_ahead() {
        let store = MemoryStore::new();

        // Server stamps run far ahead of the device clock used for synced_at
        let tomb = remote("a", 100_000, 0).into_tombstone();
        store
            .upsert_from_remote(&task(), &[tomb], Timestamp(1_000), &resolve)
            .unwrap();

        let record = store.get_record(&task(), "a").unwrap().unwrap();
        assert_eq!(record.synced_at, Some(Timestamp(1_000)));
        assert_eq!(store.purge_tombstones(&task()).unwrap(), 1);
        assert!(store.get_record(&task(), "a").unwrap().is_none());
    }

    #[test]
    fn pushed_tombstone_purges_when_device_clock_lags() {
        let store = MemoryStore::new();
        let tomb = store
            .write_local(&task(), "a", vec![], true, Timestamp(1_000))
            .unwrap();

        // Ack stamp from a server whose clock runs ahead of the device
        store
            .compare_and_clear_dirty(
                &task(),
                "a",
                tomb.updated_at,
                Timestamp(100_000),
                Timestamp(1_000),
            )
            .unwrap();
        let record = store.get_record(&task(), "a").unwrap().unwrap();
        assert_eq!(record.updated_at, Timestamp(100_000));
        assert_eq!(store.purge_tombstones(&task()).unwrap(), 1);
    }

    fn outbox_entry(created_at: u64) -> OutboxEntry {
        OutboxEntry::new(
            "chat_message".into(),
            OperationKind::MessageSend,
            vec![7],
            "farmer-1",
            Timestamp(created_at),
        )
    }

    #[test]
    fn claim_is_exclusive_and_ordered() {
        let store = MemoryStore::new();
        let late = outbox_entry(20);
        let early = outbox_entry(10);
        store.enqueue_outbox_entry(late.clone()).unwrap();
        store.enqueue_outbox_entry(early.clone()).unwrap();

        let first = store.claim_outbox_entries(1, Timestamp(30)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].entry_id, early.entry_id);
        assert_eq!(first[0].status, OutboxStatus::InFlight);

        let second = store.claim_outbox_entries(10, Timestamp(30)).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].entry_id, late.entry_id);

        assert!(store.claim_outbox_entries(10, Timestamp(30)).unwrap().is_empty());
    }

    #[test]
    fn stale_claims_are_recovered() {
        let store = MemoryStore::new();
        let entry = outbox_entry(10);
        store.enqueue_outbox_entry(entry.clone()).unwrap();
        store.claim_outbox_entries(1, Timestamp(100)).unwrap();

        assert_eq!(store.recover_stale_in_flight(Timestamp(100)).unwrap(), 0);
        assert_eq!(store.recover_stale_in_flight(Timestamp(500)).unwrap(), 1);

        let recovered = store.get_outbox_entry(entry.entry_id).unwrap().unwrap();
        assert_eq!(recovered.status, OutboxStatus::Pending);
        assert_eq!(recovered.idempotency_token, entry.idempotency_token);
    }

    #[test]
    fn purge_only_touches_old_completed_entries() {
        let store = MemoryStore::new();
        let done = outbox_entry(1);
        let pending = outbox_entry(2);
        store.enqueue_outbox_entry(done.clone()).unwrap();
        store.enqueue_outbox_entry(pending.clone()).unwrap();

        store.claim_outbox_entries(1, Timestamp(5)).unwrap();
        store
            .complete_outbox_entry(done.entry_id, Timestamp(6))
            .unwrap();

        assert_eq!(store.purge_completed(Timestamp(6)).unwrap(), 0);
        assert_eq!(store.purge_completed(Timestamp(7)).unwrap(), 1);
        assert!(store.get_outbox_entry(pending.entry_id).unwrap().is_some());
    }

    #[test]
    fn missing_entry_is_an_error() {
        let store = MemoryStore::new();
        let result = store.complete_outbox_entry(Uuid::new_v4(), Timestamp(1));
        assert!(matches!(result, Err(StoreError::EntryNotFound(_))));
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.cbor");

        let store = MemoryStore::new();
        store
            .write_local(&task(), "task-1", vec![1, 2], false, Timestamp(100))
            .unwrap();
        store.advance_cursor(&task(), Timestamp(90)).unwrap();
        let entry = outbox_entry(5);
        store.enqueue_outbox_entry(entry.clone()).unwrap();
        store.save_snapshot(&path).unwrap();

        let loaded = MemoryStore::load_snapshot(&path).unwrap();
        assert_eq!(
            loaded.get_record(&task(), "task-1").unwrap(),
            store.get_record(&task(), "task-1").unwrap()
        );
        assert_eq!(
            loaded.get_cursor(&task()).unwrap().unwrap().last_pulled_at,
            Timestamp(90)
        );
        assert_eq!(
            loaded.get_outbox_entry(entry.entry_id).unwrap(),
            Some(entry)
        );
        assert_eq!(loaded.entity_types(), vec![task()]);
    }

    #[test]
    fn corrupt_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.cbor");
        fs::write(&path, [0xFF, 0xFF]).unwrap();
        assert!(MemoryStore::load_snapshot(&path).is_err());
    }
}
