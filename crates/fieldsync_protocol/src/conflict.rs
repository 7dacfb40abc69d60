//! Conflict resolution.
//!
//! The resolver decides, for one logical record, whether an incoming remote
//! version replaces the local one. It is a pure function: no I/O, no clock.
//!
//! Rules, in order:
//! 1. No local record: accept remote.
//! 2. Local record is dirty: keep local. The remote version comes back on a
//!    later pull once the local change has been pushed.
//! 3. Otherwise last-write-wins on `updated_at`; an exact tie goes to remote.
//!
//! Tombstones are ordinary versions and follow the same rules.

use crate::record::SyncableRecord;

/// Which side wins a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the local version.
    KeepLocal,
    /// Write the remote version locally.
    AcceptRemote,
}

/// Why the resolver picked a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionReason {
    /// No local copy existed.
    NewRecord,
    /// Local copy has unpushed changes.
    LocalDirty,
    /// Remote `updated_at` is strictly greater.
    RemoteNewer,
    /// Local `updated_at` is strictly greater.
    LocalNewer,
    /// Equal `updated_at`, remote is canonical.
    Tie,
}

/// A resolver decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// The winning side.
    pub resolution: ConflictResolution,
    /// The rule that decided it.
    pub reason: ResolutionReason,
}

impl Decision {
    fn new(resolution: ConflictResolution, reason: ResolutionReason) -> Self {
        Self { resolution, reason }
    }

    /// Returns true if the remote version should be written.
    pub fn accepts_remote(&self) -> bool {
        self.resolution == ConflictResolution::AcceptRemote
    }

    /// Returns true if a live local change shadowed the remote version.
    pub fn is_conflict(&self) -> bool {
        self.reason == ResolutionReason::LocalDirty
    }
}

/// Decides between a local and a remote version of the same record.
pub fn resolve(local: Option<&SyncableRecord>, remote: &SyncableRecord) -> Decision {
    let Some(local) = local else {
        return Decision::new(ConflictResolution::AcceptRemote, ResolutionReason::NewRecord);
    };

    if local.dirty {
        return Decision::new(ConflictResolution::KeepLocal, ResolutionReason::LocalDirty);
    }

    match remote.updated_at.cmp(&local.updated_at) {
        std::cmp::Ordering::Greater => {
            Decision::new(ConflictResolution::AcceptRemote, ResolutionReason::RemoteNewer)
        }
        std::cmp::Ordering::Less => {
            Decision::new(ConflictResolution::KeepLocal, ResolutionReason::LocalNewer)
        }
        std::cmp::Ordering::Equal => {
            Decision::new(ConflictResolution::AcceptRemote, ResolutionReason::Tie)
        }
    }
}

/// Returns the winning version.
pub fn resolve_record<'a>(
    local: Option<&'a SyncableRecord>,
    remote: &'a SyncableRecord,
) -> &'a SyncableRecord {
    match (resolve(local, remote).resolution, local) {
        (ConflictResolution::KeepLocal, Some(local)) => local,
        _ => remote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use proptest::prelude::*;

    fn record(updated_at: u64, dirty: bool, payload: u8) -> SyncableRecord {
        let mut record =
            SyncableRecord::remote("task".into(), "task-1", vec![payload], Timestamp(updated_at));
        record.dirty = dirty;
        record
    }

    #[test]
    fn absent_local_accepts_remote() {
        let remote = record(5, false, 1);
        let decision = resolve(None, &remote);
        assert_eq!(decision.resolution, ConflictResolution::AcceptRemote);
        assert_eq!(decision.reason, ResolutionReason::NewRecord);
        assert_eq!(resolve_record(None, &remote), &remote);
    }

    #[test]
    fn dirty_local_wins_over_newer_remote() {
        let local = record(10, true, 1);
        let remote = record(20, false, 2);

        let decision = resolve(Some(&local), &remote);
        assert_eq!(decision.resolution, ConflictResolution::KeepLocal);
        assert!(decision.is_conflict());
        assert_eq!(resolve_record(Some(&local), &remote), &local);
    }

    #[test]
    fn clean_local_loses_to_newer_remote() {
        let local = record(10, false, 1);
        let remote = record(20, false, 2);

        let decision = resolve(Some(&local), &remote);
        assert_eq!(decision.resolution, ConflictResolution::AcceptRemote);
        assert_eq!(decision.reason, ResolutionReason::RemoteNewer);
        assert_eq!(resolve_record(Some(&local), &remote), &remote);
    }

    #[test]
    fn clean_local_newer_is_kept() {
        let local = record(30, false, 1);
        let remote = record(20, false, 2);
        assert_eq!(
            resolve(Some(&local), &remote).reason,
            ResolutionReason::LocalNewer
        );
    }

    #[test]
    fn tie_goes_to_remote() {
        let local = record(20, false, 1);
        let remote = record(20, false, 2);
        let decision = resolve(Some(&local), &remote);
        assert_eq!(decision.resolution, ConflictResolution::AcceptRemote);
        assert_eq!(decision.reason, ResolutionReason::Tie);
    }

    #[test]
    fn newer_remote_tombstone_deletes_clean_local() {
        let local = record(10, false, 1);
        let remote = record(11, false, 1).into_tombstone();
        let winner = resolve_record(Some(&local), &remote);
        assert!(winner.is_deleted);
    }

    #[test]
    fn remote_tombstone_does_not_touch_dirty_local() {
        let local = record(10, true, 1);
        let remote = record(99, false, 1).into_tombstone();
        let winner = resolve_record(Some(&local), &remote);
        assert!(!winner.is_deleted);
    }

    proptest! {
        #[test]
        fn dirty_local_always_wins(local_ts in any::<u64>(), remote_ts in any::<u64>()) {
            let local = record(local_ts, true, 1);
            let remote = record(remote_ts, false, 2);
            prop_assert_eq!(resolve(Some(&local), &remote).resolution, ConflictResolution::KeepLocal);
        }

        #[test]
        fn clean_merge_keeps_the_greater_timestamp(local_ts in any::<u64>(), remote_ts in any::<u64>()) {
            let local = record(local_ts, false, 1);
            let remote = record(remote_ts, false, 2);
            let winner = resolve_record(Some(&local), &remote);
            prop_assert_eq!(winner.updated_at, Timestamp(local_ts.max(remote_ts)));
        }

        #[test]
        fn resolving_twice_is_stable(local_ts in any::<u64>(), remote_ts in any::<u64>(), dirty in any::<bool>()) {
            let local = record(local_ts, dirty, 1);
            let remote = record(remote_ts, false, 2);
            let first = resolve_record(Some(&local), &remote).clone();
            let second = resolve_record(Some(&first), &remote);
            prop_assert_eq!(&first, second);
        }
    }
}
