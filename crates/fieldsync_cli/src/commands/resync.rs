//! Resync command implementation.

use crate::error::CliResult;
use fieldsync_engine::{CursorStore, MemoryStore};
use fieldsync_protocol::{EntityType, Timestamp};
use std::path::Path;

/// Runs the resync command.
pub fn run(path: &Path, entity_type: &str) -> CliResult<()> {
    let store = MemoryStore::load_snapshot(path)?;
    let entity_type = EntityType::new(entity_type);

    match resync(&store, &entity_type)? {
        Some(previous) => println!("Reset {entity_type} cursor (was {previous})"),
        None => println!("{entity_type} had no cursor; next sync pulls everything anyway"),
    }
    store.save_snapshot(path)?;
    Ok(())
}

/// Drops the cursor, returning its previous watermark.
pub fn resync(store: &MemoryStore, entity_type: &EntityType) -> CliResult<Option<Timestamp>> {
    let previous = store
        .get_cursor(entity_type)?
        .map(|cursor| cursor.last_pulled_at);
    store.reset_cursor(entity_type)?;
    Ok(previous)
}
