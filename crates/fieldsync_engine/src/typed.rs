//! Typed access to records of one [`Syncable`] entity type.

use crate::clock::Clock;
use crate::error::{StoreError, SyncError, SyncResult};
use crate::store::RecordStore;
use fieldsync_protocol::{encode, EntityType, Syncable, SyncableRecord};
use std::marker::PhantomData;
use std::sync::Arc;

/// Reads and writes entities of type `T` through the local store.
///
/// Writes go through [`RecordStore::write_local`], so every save or delete
/// marks the record dirty for the next push.
pub struct TypedRecords<T, S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    entity_type: EntityType,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S> TypedRecords<T, S>
where
    T: Syncable,
    S: RecordStore + ?Sized,
{
    /// Creates a typed view over `store`.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            entity_type: T::entity_type(),
            _marker: PhantomData,
        }
    }

    /// Entity type of this view.
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Inserts or updates an entity.
    pub fn save(&self, entity: &T) -> SyncResult<SyncableRecord> {
        let payload = encode(entity)?;
        let record = self.store.write_local(
            &self.entity_type,
            entity.id(),
            payload,
            false,
            self.clock.now(),
        )?;
        Ok(record)
    }

    /// Deletes an entity by writing a tombstone.
    pub fn delete(&self, id: &str) -> SyncResult<SyncableRecord> {
        let existing = self
            .store
            .get_record(&self.entity_type, id)?
            .ok_or_else(|| StoreError::RecordNotFound {
                entity_type: self.entity_type.clone(),
                id: id.to_string(),
            })?;
        let record = self.store.write_local(
            &self.entity_type,
            id,
            existing.payload,
            true,
            self.clock.now(),
        )?;
        Ok(record)
    }

    /// Returns a live entity. Tombstones read as `None`.
    pub fn get(&self, id: &str) -> SyncResult<Option<T>> {
        match self.store.get_record(&self.entity_type, id)? {
            Some(record) if !record.is_deleted => Ok(Some(record.decode::<T>()?)),
            _ => Ok(None),
        }
    }

    /// Returns every live entity.
    pub fn list(&self) -> SyncResult<Vec<T>> {
        self.store
            .list_records(&self.entity_type)?
            .iter()
            .filter(|r| !r.is_deleted)
            .map(|r| r.decode::<T>().map_err(SyncError::from))
            .collect()
    }

    /// Returns the raw record, sync metadata included.
    pub fn record(&self, id: &str) -> SyncResult<Option<SyncableRecord>> {
        Ok(self.store.get_record(&self.entity_type, id)?)
    }
}
