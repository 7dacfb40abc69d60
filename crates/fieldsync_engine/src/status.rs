//! Sync status events for UI badges.

use fieldsync_protocol::EntityType;
use serde::Serialize;

/// State of one entity type's sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleState {
    /// No cycle running.
    Idle,
    /// A push-then-pull cycle is in flight.
    Running,
    /// Waiting out a backoff after a transient failure.
    BackingOff,
}

impl CycleState {
    /// Returns true while a cycle is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, CycleState::Running)
    }
}

/// One status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Entity type.
    pub entity_type: EntityType,
    /// Current state.
    pub state: CycleState,
    /// Dirty records not yet confirmed by the remote store.
    pub pending_count: usize,
}
