//! Per-cycle reports.
//!
//! Failures never abort a whole cycle; they are counted here and returned to
//! the caller.

use crate::store::MergeOutcome;
use fieldsync_protocol::{EntityType, Timestamp};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// A record the remote store refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordRejection {
    /// Record id.
    pub id: String,
    /// Reason given by the remote store.
    pub reason: String,
}

/// Result of one or more push batches.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PushReport {
    /// Batches sent.
    pub batches: u32,
    /// Records sent.
    pub attempted: u64,
    /// Records accepted and cleared.
    pub pushed: u64,
    /// Accepted records that stayed dirty because a local write raced the push.
    pub skipped_concurrent: u64,
    /// Records rejected by the remote store.
    pub rejected: u64,
    /// Records left dirty for the next cycle (transient failure or no ack).
    pub deferred: u64,
    /// Rejection details.
    pub rejections: Vec<RecordRejection>,
    /// Set when a batch failed transiently.
    pub transient_error: Option<String>,
}

impl PushReport {
    /// Adds another report to this one.
    pub fn absorb(&mut self, other: PushReport) {
        self.batches += other.batches;
        self.attempted += other.attempted;
        self.pushed += other.pushed;
        self.skipped_concurrent += other.skipped_concurrent;
        self.rejected += other.rejected;
        self.deferred += other.deferred;
        self.rejections.extend(other.rejections);
        if other.transient_error.is_some() {
            self.transient_error = other.transient_error;
        }
    }
}

/// Result of a pull pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PullReport {
    /// Pages fetched.
    pub pages: u32,
    /// Records received.
    pub received: u64,
    /// Merge counts.
    pub merge: MergeCounts,
    /// Cursor before the pass.
    pub cursor_before: Option<Timestamp>,
    /// Cursor after the pass.
    pub cursor_after: Option<Timestamp>,
    /// True if the remote had nothing more to send.
    pub exhausted: bool,
    /// Set when a page request failed transiently.
    pub transient_error: Option<String>,
}

/// Serializable mirror of [`MergeOutcome`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    /// Remote versions written locally.
    pub applied: u64,
    /// Remote versions shadowed by dirty local records.
    pub kept_dirty: u64,
    /// Remote versions older than clean local records.
    pub kept_newer: u64,
}

impl MergeCounts {
    /// Adds a merge outcome.
    pub fn absorb(&mut self, outcome: MergeOutcome) {
        self.applied += outcome.applied;
        self.kept_dirty += outcome.kept_dirty;
        self.kept_newer += outcome.kept_newer;
    }
}

/// An outbox entry that ended in `FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryFailure {
    /// Entry id.
    pub entry_id: Uuid,
    /// Failure reason.
    pub reason: String,
}

/// Result of one outbox drain.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    /// True if another drain was already running and this one did nothing.
    pub skipped: bool,
    /// Abandoned claims moved back to `PENDING`.
    pub recovered_stale: u64,
    /// Entries claimed.
    pub claimed: u64,
    /// Entries completed.
    pub delivered: u64,
    /// Completions the remote reported as duplicates of an earlier delivery.
    pub duplicates: u64,
    /// Entries requeued after a transient failure.
    pub requeued: u64,
    /// Entries the remote rejected.
    pub failed_permanently: u64,
    /// Entries that ran out of attempts.
    pub exhausted: u64,
    /// Details for every entry that ended in `FAILED`.
    pub failures: Vec<EntryFailure>,
}

impl DrainReport {
    /// A report for a drain that did not run.
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// How an entity-type cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CycleOutcome {
    /// Push and pull ran to completion.
    Completed,
    /// Not run because the type is backing off after a transient failure.
    Deferred {
        /// Earliest time the next cycle runs.
        not_before: Timestamp,
    },
    /// Stopped by a failure.
    Failed {
        /// Error message.
        error: String,
        /// Whether the next cycle is expected to succeed.
        retryable: bool,
    },
    /// Stopped by cancellation.
    Cancelled,
}

/// Result of one entity type's push-then-pull cycle.
#[derive(Debug, Clone, Serialize)]
pub struct EntityReport {
    /// Entity type.
    pub entity_type: EntityType,
    /// How the cycle ended.
    pub outcome: CycleOutcome,
    /// True if this caller joined a cycle that was already running.
    pub joined: bool,
    /// Push counts.
    pub push: PushReport,
    /// Pull counts.
    pub pull: PullReport,
    /// Wall time of the cycle.
    pub duration: Duration,
}

impl EntityReport {
    /// Creates an empty report.
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            outcome: CycleOutcome::Completed,
            joined: false,
            push: PushReport::default(),
            pull: PullReport::default(),
            duration: Duration::ZERO,
        }
    }

    /// Creates a report for a cycle that was cancelled.
    pub fn cancelled(entity_type: EntityType) -> Self {
        Self {
            outcome: CycleOutcome::Cancelled,
            ..Self::new(entity_type)
        }
    }

    /// Returns the transient error that interrupted this cycle, if any.
    pub fn transient_error(&self) -> Option<&str> {
        self.push
            .transient_error
            .as_deref()
            .or(self.pull.transient_error.as_deref())
    }
}

/// Aggregated result of a `run_sync` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// One report per entity type, sorted by type.
    pub entities: Vec<EntityReport>,
    /// Outbox drain result, when the run included a drain.
    pub outbox: Option<DrainReport>,
    /// Wall time of the run.
    pub duration: Duration,
}

impl SyncReport {
    /// Records accepted by the remote store.
    pub fn pushed(&self) -> u64 {
        self.entities.iter().map(|e| e.push.pushed).sum()
    }

    /// Remote records written locally.
    pub fn pulled(&self) -> u64 {
        self.entities.iter().map(|e| e.pull.merge.applied).sum()
    }

    /// Records and outbox entries that need manual intervention.
    pub fn failed_permanently(&self) -> u64 {
        let records: u64 = self.entities.iter().map(|e| e.push.rejected).sum();
        let entries = self
            .outbox
            .as_ref()
            .map_or(0, |o| o.failed_permanently + o.exhausted);
        records + entries
    }

    /// Work left for a later cycle after a transient failure.
    pub fn retries_scheduled(&self) -> u64 {
        let records: u64 = self.entities.iter().map(|e| e.push.deferred).sum();
        let pulls = self
            .entities
            .iter()
            .filter(|e| e.pull.transient_error.is_some())
            .count() as u64;
        let entries = self.outbox.as_ref().map_or(0, |o| o.requeued);
        records + pulls + entries
    }

    /// Returns the report for one entity type.
    pub fn entity(&self, entity_type: &EntityType) -> Option<&EntityReport> {
        self.entities.iter().find(|e| &e.entity_type == entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_reports_accumulate() {
        let mut total = PushReport::default();
        total.absorb(PushReport {
            batches: 1,
            attempted: 3,
            pushed: 2,
            rejected: 1,
            rejections: vec![RecordRejection {
                id: "task-1".into(),
                reason: "invalid".into(),
            }],
            ..PushReport::default()
        });
        total.absorb(PushReport {
            batches: 1,
            attempted: 2,
            deferred: 2,
            transient_error: Some("offline".into()),
            ..PushReport::default()
        });

        assert_eq!(total.batches, 2);
        assert_eq!(total.attempted, 5);
        assert_eq!(total.pushed, 2);
        assert_eq!(total.deferred, 2);
        assert_eq!(total.rejections.len(), 1);
        assert_eq!(total.transient_error.as_deref(), Some("offline"));
    }

    #[test]
    fn sync_report_totals() {
        let mut task = EntityReport::new("task".into());
        task.push.pushed = 4;
        task.push.rejected = 1;
        task.push.deferred = 2;
        task.pull.merge.applied = 3;

        let mut chat = EntityReport::new("chat_message".into());
        chat.pull.transient_error = Some("timeout".into());

        let report = SyncReport {
            entities: vec![chat, task],
            outbox: Some(DrainReport {
                requeued: 1,
                failed_permanently: 1,
                exhausted: 1,
                ..DrainReport::default()
            }),
            duration: Duration::ZERO,
        };

        assert_eq!(report.pushed(), 4);
        assert_eq!(report.pulled(), 3);
        assert_eq!(report.failed_permanently(), 3);
        assert_eq!(report.retries_scheduled(), 4);
        assert!(report.entity(&"task".into()).is_some());
    }
}
