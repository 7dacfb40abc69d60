//! Messages exchanged with the remote store adapter.

use crate::record::SyncableRecord;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

/// Per-record acknowledgement of a push batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Record id.
    pub id: String,
    /// Whether the remote store accepted this record.
    pub accepted: bool,
    /// Remote clock at the time it processed the record.
    pub server_time: Timestamp,
    /// Validation message when rejected.
    pub error: Option<String>,
}

impl PushAck {
    /// Creates an acceptance ack.
    pub fn accepted(id: impl Into<String>, server_time: Timestamp) -> Self {
        Self {
            id: id.into(),
            accepted: true,
            server_time,
            error: None,
        }
    }

    /// Creates a rejection ack.
    pub fn rejected(
        id: impl Into<String>,
        server_time: Timestamp,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            accepted: false,
            server_time,
            error: Some(error.into()),
        }
    }
}

/// One page of remote changes, ordered by `updated_at` ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullPage {
    /// Remote records with `updated_at` greater than the requested cursor.
    pub records: Vec<SyncableRecord>,
    /// Whether the remote store has more records after this page.
    pub has_more: bool,
}

impl PullPage {
    /// Creates a new page.
    pub fn new(records: Vec<SyncableRecord>, has_more: bool) -> Self {
        Self { records, has_more }
    }

    /// Creates an empty, exhausted page.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the highest `updated_at` in the page.
    pub fn max_updated_at(&self) -> Option<Timestamp> {
        self.records.iter().map(|r| r.updated_at).max()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the page carries no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Result of delivering one outbox entry.
///
/// Transient failures are not an outcome: the adapter reports them as a
/// retryable error so the entry is requeued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    /// The remote store applied the operation.
    Delivered {
        /// True if the idempotency token had already been applied and this
        /// delivery was collapsed into the earlier one.
        duplicate: bool,
    },
    /// The remote store refused the payload. Never retried automatically.
    Rejected {
        /// Reason given by the remote store.
        reason: String,
    },
}

impl DispatchOutcome {
    /// Returns true for either kind of successful delivery.
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }

    /// Returns true if the failure is permanent.
    pub fn is_permanent_failure(&self) -> bool {
        matches!(self, DispatchOutcome::Rejected { .. })
    }
}
