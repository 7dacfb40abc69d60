//! Local store adapter traits.
//!
//! The engine reads and writes local state only through these traits. Every
//! method is one short atomic step; none of them may be held open across a
//! network call.

use crate::error::StoreResult;
use fieldsync_protocol::{
    Decision, DirtyRef, EntityType, OutboxEntry, OutboxStatus, SyncCursor, SyncableRecord,
    Timestamp,
};
use uuid::Uuid;

/// Decides between a local and a remote version of one record.
pub type Resolver = dyn Fn(Option<&SyncableRecord>, &SyncableRecord) -> Decision + Send + Sync;

/// Counts produced by merging one page of remote records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Remote versions written locally.
    pub applied: u64,
    /// Remote versions discarded because the local copy is dirty.
    pub kept_dirty: u64,
    /// Remote versions discarded because the clean local copy is newer.
    pub kept_newer: u64,
}

impl MergeOutcome {
    /// Adds another outcome to this one.
    pub fn absorb(&mut self, other: MergeOutcome) {
        self.applied += other.applied;
        self.kept_dirty += other.kept_dirty;
        self.kept_newer += other.kept_newer;
    }
}

/// Syncable records and their metadata.
pub trait RecordStore: Send + Sync {
    /// Writes a local mutation.
    ///
    /// Sets `dirty`, clears any rejection and moves `updated_at` to
    /// `max(now, previous + 1)` so every local write is strictly newer than
    /// the version a concurrent push may have read.
    fn write_local(
        &self,
        entity_type: &EntityType,
        id: &str,
        payload: Vec<u8>,
        is_deleted: bool,
        now: Timestamp,
    ) -> StoreResult<SyncableRecord>;

    /// Returns one record, tombstones included.
    fn get_record(&self, entity_type: &EntityType, id: &str) -> StoreResult<Option<SyncableRecord>>;

    /// Returns all records of a type, tombstones included.
    fn list_records(&self, entity_type: &EntityType) -> StoreResult<Vec<SyncableRecord>>;

    /// Returns up to `limit` push-eligible dirty records as `(id, updated_at)`,
    /// oldest first. Rejected records are excluded.
    fn list_dirty(&self, entity_type: &EntityType, limit: usize) -> StoreResult<Vec<DirtyRef>>;

    /// Fetches full records for a dirty snapshot. Records that are no longer
    /// push-eligible are skipped.
    fn fetch_dirty(
        &self,
        entity_type: &EntityType,
        refs: &[DirtyRef],
    ) -> StoreResult<Vec<SyncableRecord>>;

    /// Clears `dirty` only if `updated_at` still equals `expected_updated_at`.
    ///
    /// On success the record adopts `confirmed_updated_at`, the stamp the
    /// remote stored it under, so clean records always carry remote-clock
    /// versions. Returns false, leaving the record dirty, if a local write
    /// happened in between. `synced_at` is raised to `synced_at`, never
    /// lowered.
    fn compare_and_clear_dirty(
        &self,
        entity_type: &EntityType,
        id: &str,
        expected_updated_at: Timestamp,
        confirmed_updated_at: Timestamp,
        synced_at: Timestamp,
    ) -> StoreResult<bool>;

    /// Attaches a rejection reason if `updated_at` is unchanged. The record
    /// stays dirty.
    fn mark_rejected(
        &self,
        entity_type: &EntityType,
        id: &str,
        expected_updated_at: Timestamp,
        reason: &str,
    ) -> StoreResult<bool>;

    /// Removes a rejection so the record is pushed again.
    fn clear_rejection(&self, entity_type: &EntityType, id: &str) -> StoreResult<bool>;

    /// Returns dirty records that carry a rejection reason.
    fn rejected_records(&self, entity_type: &EntityType) -> StoreResult<Vec<SyncableRecord>>;

    /// Merges one page of remote records in a single atomic step, routing
    /// each through `resolver` against the current local version.
    fn upsert_from_remote(
        &self,
        entity_type: &EntityType,
        records: &[SyncableRecord],
        synced_at: Timestamp,
        resolver: &Resolver,
    ) -> StoreResult<MergeOutcome>;

    /// Number of dirty records, rejected ones included.
    fn pending_count(&self, entity_type: &EntityType) -> StoreResult<usize>;

    /// Physically removes tombstones both sides have observed.
    fn purge_tombstones(&self, entity_type: &EntityType) -> StoreResult<usize>;
}

/// Per-entity-type pull watermarks.
pub trait CursorStore: Send + Sync {
    /// Returns the cursor, `None` before the first pull.
    fn get_cursor(&self, entity_type: &EntityType) -> StoreResult<Option<SyncCursor>>;

    /// Moves the cursor forward to `observed`, creating it if needed.
    /// Returns the resulting watermark.
    fn advance_cursor(&self, entity_type: &EntityType, observed: Timestamp)
        -> StoreResult<Timestamp>;

    /// Drops the cursor so the next pull starts from the beginning.
    fn reset_cursor(&self, entity_type: &EntityType) -> StoreResult<()>;

    /// Returns every cursor.
    fn list_cursors(&self) -> StoreResult<Vec<SyncCursor>>;
}

/// Durable queue of side-effecting operations.
pub trait OutboxLog: Send + Sync {
    /// Appends a new entry.
    fn enqueue_outbox_entry(&self, entry: OutboxEntry) -> StoreResult<()>;

    /// Returns one entry.
    fn get_outbox_entry(&self, entry_id: Uuid) -> StoreResult<Option<OutboxEntry>>;

    /// Returns entries, optionally filtered by status, oldest first.
    fn list_outbox_entries(&self, status: Option<OutboxStatus>) -> StoreResult<Vec<OutboxEntry>>;

    /// Atomically moves up to `limit` claimable entries to `IN_FLIGHT`,
    /// oldest first. An entry is returned by at most one claim.
    fn claim_outbox_entries(&self, limit: usize, now: Timestamp) -> StoreResult<Vec<OutboxEntry>>;

    /// `IN_FLIGHT -> COMPLETED`.
    fn complete_outbox_entry(&self, entry_id: Uuid, now: Timestamp) -> StoreResult<()>;

    /// `IN_FLIGHT -> PENDING`, claimable again at `next_attempt_at`.
    fn requeue_outbox_entry(
        &self,
        entry_id: Uuid,
        next_attempt_at: Timestamp,
        error: Option<String>,
    ) -> StoreResult<()>;

    /// `IN_FLIGHT -> FAILED`.
    fn fail_outbox_entry(&self, entry_id: Uuid, reason: &str) -> StoreResult<()>;

    /// `FAILED -> PENDING` with a fresh attempt budget.
    fn rearm_outbox_entry(&self, entry_id: Uuid) -> StoreResult<()>;

    /// Requeues `IN_FLIGHT` entries claimed before `claimed_before`.
    fn recover_stale_in_flight(&self, claimed_before: Timestamp) -> StoreResult<usize>;

    /// Removes `COMPLETED` entries that completed before `completed_before`.
    fn purge_completed(&self, completed_before: Timestamp) -> StoreResult<usize>;
}

/// Everything the orchestrator needs from local persistence.
pub trait LocalStore: RecordStore + CursorStore + OutboxLog {}

impl<T: RecordStore + CursorStore + OutboxLog> LocalStore for T {}
