//! Syncable records.

use crate::codec;
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{EntityType, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A domain entity the engine can synchronize.
///
/// Implemented once per entity type. The engine never looks inside the
/// entity; it only needs the type name, a stable id and serde support to
/// move the payload as opaque CBOR bytes.
///
/// # Example
///
/// ```
/// use fieldsync_protocol::Syncable;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Task {
///     id: String,
///     title: String,
/// }
///
/// impl Syncable for Task {
///     const ENTITY_TYPE: &'static str = "task";
///
///     fn id(&self) -> &str {
///         &self.id
///     }
/// }
/// ```
pub trait Syncable: Serialize + DeserializeOwned {
    /// Name of the entity type.
    const ENTITY_TYPE: &'static str;

    /// Stable identifier, unique within the entity type.
    fn id(&self) -> &str;

    /// Returns the entity type as an [`EntityType`].
    fn entity_type() -> EntityType {
        EntityType::new(Self::ENTITY_TYPE)
    }
}

/// A business payload plus its synchronization metadata.
///
/// # Invariants
///
/// - A dirty record is never overwritten by a pull (local wins while dirty)
/// - `dirty` is only cleared by compare-and-clear against `updated_at`
/// - `synced_at` never decreases and never runs ahead of the local clock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableRecord {
    /// Entity type this record belongs to.
    pub entity_type: EntityType,
    /// Client-generated identifier, unique within the entity type.
    pub id: String,
    /// Opaque CBOR payload.
    pub payload: Vec<u8>,
    /// Logical last-modified timestamp.
    pub updated_at: Timestamp,
    /// True while local changes are not yet confirmed by the remote store.
    pub dirty: bool,
    /// Last confirmed sync, `None` until the first one.
    pub synced_at: Option<Timestamp>,
    /// Tombstone flag.
    pub is_deleted: bool,
    /// Reason the remote store rejected the current version, if it did.
    pub sync_error: Option<String>,
}

impl SyncableRecord {
    /// Creates a record written locally and not yet pushed.
    pub fn local(
        entity_type: EntityType,
        id: impl Into<String>,
        payload: Vec<u8>,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            entity_type,
            id: id.into(),
            payload,
            updated_at,
            dirty: true,
            synced_at: None,
            is_deleted: false,
            sync_error: None,
        }
    }

    /// Creates a record as delivered by the remote store.
    pub fn remote(
        entity_type: EntityType,
        id: impl Into<String>,
        payload: Vec<u8>,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            entity_type,
            id: id.into(),
            payload,
            updated_at,
            dirty: false,
            synced_at: None,
            is_deleted: false,
            sync_error: None,
        }
    }

    /// Builds a dirty record from a typed entity.
    pub fn from_entity<T: Syncable>(entity: &T, updated_at: Timestamp) -> ProtocolResult<Self> {
        Ok(Self::local(
            T::entity_type(),
            entity.id(),
            codec::encode(entity)?,
            updated_at,
        ))
    }

    /// Decodes the payload as a typed entity.
    pub fn decode<T: Syncable>(&self) -> ProtocolResult<T> {
        if self.entity_type.as_str() != T::ENTITY_TYPE {
            return Err(ProtocolError::EntityTypeMismatch {
                expected: T::ENTITY_TYPE.to_string(),
                found: self.entity_type.to_string(),
            });
        }
        codec::decode(&self.payload)
    }

    /// Marks this record as a tombstone.
    #[must_use]
    pub fn into_tombstone(mut self) -> Self {
        self.is_deleted = true;
        self
    }

    /// Returns the `(id, updated_at)` pair used for dirty snapshots.
    pub fn dirty_ref(&self) -> DirtyRef {
        DirtyRef {
            id: self.id.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Returns true if the push coordinator should send this record.
    ///
    /// Rejected records stay dirty but are not pushed again until they are
    /// rewritten locally or the rejection is cleared.
    pub fn is_push_eligible(&self) -> bool {
        self.dirty && self.sync_error.is_none()
    }

    /// Returns true if both sides have observed this tombstone.
    ///
    /// A clean record's current version is always one the remote holds:
    /// either it was pulled, or a push ack confirmed it. `updated_at` and
    /// `synced_at` come from different clocks and are not compared.
    pub fn is_purgeable(&self) -> bool {
        self.is_deleted && !self.dirty && self.synced_at.is_some()
    }
}

/// Lightweight `(id, updated_at)` snapshot of a dirty record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirtyRef {
    /// Record id.
    pub id: String,
    /// `updated_at` observed when the snapshot was taken.
    pub updated_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Task {
        id: String,
        title: String,
        done: bool,
    }

    impl Syncable for Task {
        const ENTITY_TYPE: &'static str = "task";

        fn id(&self) -> &str {
            &self.id
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct ChatMessage {
        id: String,
        body: String,
    }

    impl Syncable for ChatMessage {
        const ENTITY_TYPE: &'static str = "chat_message";

        fn id(&self) -> &str {
            &self.id
        }
    }

    fn task() -> Task {
        Task {
            id: "task-1".into(),
            title: "Spray the orchard".into(),
            done: false,
        }
    }

    #[test]
    fn from_entity_is_dirty() {
        let record = SyncableRecord::from_entity(&task(), Timestamp(100)).unwrap();
        assert_eq!(record.entity_type.as_str(), "task");
        assert_eq!(record.id, "task-1");
        assert!(record.dirty);
        assert!(record.synced_at.is_none());
        assert!(record.is_push_eligible());

        let decoded: Task = record.decode().unwrap();
        assert_eq!(decoded, task());
    }

    #[test]
    fn decode_checks_entity_type() {
        let record = SyncableRecord::from_entity(&task(), Timestamp(100)).unwrap();
        let result = record.decode::<ChatMessage>();
        assert!(matches!(
            result,
            Err(ProtocolError::EntityTypeMismatch { .. })
        ));
    }

    #[test]
    fn rejected_record_is_not_push_eligible() {
        let mut record = SyncableRecord::from_entity(&task(), Timestamp(100)).unwrap();
        record.sync_error = Some("title too long".into());
        assert!(record.dirty);
        assert!(!record.is_push_eligible());
    }

    #[test]
    fn tombstone_purge_requires_both_sides() {
        let mut record =
            SyncableRecord::remote("task".into(), "task-9", vec![], Timestamp(50)).into_tombstone();
        assert!(!record.is_purgeable());

        // Device clock behind the server stamp still counts as observed
        record.synced_at = Some(Timestamp(40));
        assert!(record.is_purgeable());

        record.dirty = true;
        assert!(!record.is_purgeable());

        record.dirty = false;
        record.is_deleted = false;
        assert!(!record.is_purgeable());
    }
}
