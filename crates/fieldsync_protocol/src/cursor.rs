//! Pull cursors.

use crate::types::{EntityType, Timestamp};
use serde::{Deserialize, Serialize};

/// Per-entity-type watermark bounding incremental pulls.
///
/// # Invariants
///
/// - `last_pulled_at` only moves forward through [`SyncCursor::advance`]
/// - Rewinding is an explicit operator action (full resync), never a side
///   effect of a pull
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Entity type the cursor belongs to.
    pub entity_type: EntityType,
    /// Highest `updated_at` fully applied from the remote store.
    pub last_pulled_at: Timestamp,
}

impl SyncCursor {
    /// Creates a cursor at the given watermark.
    pub fn new(entity_type: EntityType, last_pulled_at: Timestamp) -> Self {
        Self {
            entity_type,
            last_pulled_at,
        }
    }

    /// Moves the watermark forward. Returns true if it moved.
    pub fn advance(&mut self, observed: Timestamp) -> bool {
        if observed > self.last_pulled_at {
            self.last_pulled_at = observed;
            true
        } else {
            false
        }
    }
}
