//! Outbox entries for side-effecting operations.

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{EntityType, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Client-generated key that lets the remote store collapse repeated
/// deliveries of the same logical operation into one effect.
///
/// Generated once when the entry is created and reused for every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    /// Generates a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing token value.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbox entry status.
///
/// `PENDING -> IN_FLIGHT -> {COMPLETED | FAILED}`; a transient failure moves
/// `IN_FLIGHT` back to `PENDING`, and a manual retry re-arms `FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a drain pass.
    InFlight,
    /// Delivered.
    Completed,
    /// Permanently failed or out of attempts.
    Failed,
}

impl OutboxStatus {
    /// Returns true for `COMPLETED` and `FAILED`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Completed | OutboxStatus::Failed)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::InFlight => "IN_FLIGHT",
            OutboxStatus::Completed => "COMPLETED",
            OutboxStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Kind of side effect an outbox entry performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// A remote write that is more than a row upsert (payments, disputes).
    RemoteWrite,
    /// An outgoing chat message.
    MessageSend,
    /// A file upload.
    FileUpload,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::RemoteWrite => "remote_write",
            OperationKind::MessageSend => "message_send",
            OperationKind::FileUpload => "file_upload",
        };
        f.write_str(name)
    }
}

/// A durable, pending side-effecting operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Unique entry id.
    pub entry_id: Uuid,
    /// Entity type the operation relates to.
    pub entity_type: EntityType,
    /// What the operation does.
    pub kind: OperationKind,
    /// Opaque operation payload.
    pub payload: Vec<u8>,
    /// Token reused across every delivery attempt.
    pub idempotency_token: IdempotencyToken,
    /// Lifecycle status.
    pub status: OutboxStatus,
    /// Number of dispatch attempts so far.
    pub retry_count: u32,
    /// Creation time.
    pub created_at: Timestamp,
    /// Time of the last claim.
    pub last_attempt_at: Option<Timestamp>,
    /// Earliest time a `PENDING` entry may be claimed again.
    pub next_attempt_at: Option<Timestamp>,
    /// Time the entry completed.
    pub completed_at: Option<Timestamp>,
    /// Last failure message.
    pub last_error: Option<String>,
    /// User or device that owns the entry.
    pub owner_id: String,
}

impl OutboxEntry {
    /// Creates a new `PENDING` entry with a fresh idempotency token.
    pub fn new(
        entity_type: EntityType,
        kind: OperationKind,
        payload: Vec<u8>,
        owner_id: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            entity_type,
            kind,
            payload,
            idempotency_token: IdempotencyToken::generate(),
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at,
            last_attempt_at: None,
            next_attempt_at: None,
            completed_at: None,
            last_error: None,
            owner_id: owner_id.into(),
        }
    }

    /// Returns true if a drain pass may claim this entry at `now`.
    pub fn is_claimable(&self, now: Timestamp) -> bool {
        self.status == OutboxStatus::Pending && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    fn transition(&mut self, expected: OutboxStatus, to: OutboxStatus) -> ProtocolResult<()> {
        if self.status != expected {
            return Err(ProtocolError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// `PENDING -> IN_FLIGHT`, counting the attempt.
    pub fn claim(&mut self, now: Timestamp) -> ProtocolResult<()> {
        self.transition(OutboxStatus::Pending, OutboxStatus::InFlight)?;
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_attempt_at = Some(now);
        self.next_attempt_at = None;
        Ok(())
    }

    /// `IN_FLIGHT -> COMPLETED`.
    pub fn complete(&mut self, now: Timestamp) -> ProtocolResult<()> {
        self.transition(OutboxStatus::InFlight, OutboxStatus::Completed)?;
        self.completed_at = Some(now);
        self.last_error = None;
        Ok(())
    }

    /// `IN_FLIGHT -> PENDING`, not claimable before `next_attempt_at`.
    pub fn requeue(
        &mut self,
        next_attempt_at: Timestamp,
        error: Option<String>,
    ) -> ProtocolResult<()> {
        self.transition(OutboxStatus::InFlight, OutboxStatus::Pending)?;
        self.next_attempt_at = Some(next_attempt_at);
        if error.is_some() {
            self.last_error = error;
        }
        Ok(())
    }

    /// `IN_FLIGHT -> FAILED`.
    pub fn fail(&mut self, reason: impl Into<String>) -> ProtocolResult<()> {
        self.transition(OutboxStatus::InFlight, OutboxStatus::Failed)?;
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// `FAILED -> PENDING` with a fresh attempt budget (manual retry).
    pub fn rearm(&mut self) -> ProtocolResult<()> {
        self.transition(OutboxStatus::Failed, OutboxStatus::Pending)?;
        self.retry_count = 0;
        self.next_attempt_at = None;
        Ok(())
    }
}
