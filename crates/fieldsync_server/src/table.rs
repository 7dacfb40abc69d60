//! Server-side record table.

use fieldsync_protocol::{EntityType, SyncableRecord, Timestamp};
use std::collections::BTreeMap;

/// Authoritative copy of every record, per entity type.
///
/// Every write gets a server stamp that is strictly greater than all earlier
/// stamps, so clients can page by `updated_at` without missing writes.
#[derive(Debug, Default)]
pub struct RecordTable {
    tables: BTreeMap<EntityType, BTreeMap<String, SyncableRecord>>,
    high_water: Timestamp,
}

impl RecordTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next stamp at or after `now`.
    fn stamp(&mut self, now: Timestamp) -> Timestamp {
        let stamp = now.max(self.high_water.next());
        self.high_water = stamp;
        stamp
    }

    /// Stores a record under a fresh server stamp and returns the stored copy.
    pub fn write(&mut self, record: SyncableRecord, now: Timestamp) -> SyncableRecord {
        let stamp = self.stamp(now);
        let stored = SyncableRecord {
            updated_at: stamp,
            dirty: false,
            synced_at: None,
            sync_error: None,
            ..record
        };
        self.tables
            .entry(stored.entity_type.clone())
            .or_default()
            .insert(stored.id.clone(), stored.clone());
        stored
    }

    /// Stores a record with its own `updated_at`, bypassing stamping.
    ///
    /// Lets tests build histories with equal timestamps.
    pub fn write_exact(&mut self, record: SyncableRecord) {
        self.high_water = self.high_water.max(record.updated_at);
        let stored = SyncableRecord {
            dirty: false,
            synced_at: None,
            sync_error: None,
            ..record
        };
        self.tables
            .entry(stored.entity_type.clone())
            .or_default()
            .insert(stored.id.clone(), stored);
    }

    /// Returns one record.
    pub fn get(&self, entity_type: &EntityType, id: &str) -> Option<&SyncableRecord> {
        self.tables.get(entity_type)?.get(id)
    }

    /// Returns every record of a type ordered by `(updated_at, id)`.
    pub fn ordered(&self, entity_type: &EntityType) -> Vec<&SyncableRecord> {
        let mut records: Vec<&SyncableRecord> = self
            .tables
            .get(entity_type)
            .map(|t| t.values().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Returns records with `updated_at > since`, at least `limit` of them
    /// when available.
    ///
    /// The page is extended past `limit` until the `updated_at` changes, so
    /// a client that moves its cursor to the page maximum skips nothing.
    pub fn page(
        &self,
        entity_type: &EntityType,
        since: Option<Timestamp>,
        limit: usize,
    ) -> (Vec<SyncableRecord>, bool) {
        let limit = limit.max(1);
        let after: Vec<&SyncableRecord> = self
            .ordered(entity_type)
            .into_iter()
            .filter(|r| since.map_or(true, |s| r.updated_at > s))
            .collect();

        let mut end = after.len().min(limit);
        if let Some(last) = end.checked_sub(1).map(|i| after[i].updated_at) {
            while end < after.len() && after[end].updated_at == last {
                end += 1;
            }
        }

        let has_more = end < after.len();
        let page = after[..end].iter().map(|r| (*r).clone()).collect();
        (page, has_more)
    }

    /// Number of records of one type, tombstones included.
    pub fn len(&self, entity_type: &EntityType) -> usize {
        self.tables.get(entity_type).map_or(0, BTreeMap::len)
    }

    /// Returns true if the type has no records.
    pub fn is_empty(&self, entity_type: &EntityType) -> bool {
        self.len(entity_type) == 0
    }

    /// Latest stamp issued.
    pub fn high_water(&self) -> Timestamp {
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn task() -> EntityType {
        EntityType::new("task")
    }

    fn record(id: &str, updated_at: u64) -> SyncableRecord {
        SyncableRecord::local(task(), id, vec![1], Timestamp(updated_at))
    }

    #[test]
    fn stamps_are_strictly_increasing() {
        let mut table = RecordTable::new();
        let a = table.write(record("a", 0), Timestamp(100));
        let b = table.write(record("b", 0), Timestamp(100));
        let c = table.write(record("c", 0), Timestamp(50));

        assert_eq!(a.updated_at, Timestamp(100));
        assert_eq!(b.updated_at, Timestamp(101));
        assert_eq!(c.updated_at, Timestamp(102));
        assert!(!a.dirty);
    }

    #[test]
    fn page_is_strictly_after_cursor() {
        let mut table = RecordTable::new();
        table.write_exact(record("a", 10));
        table.write_exact(record("b", 20));
        table.write_exact(record("c", 30));

        let (page, has_more) = table.page(&task(), Some(Timestamp(10)), 10);
        let ids: Vec<_> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(!has_more);
    }

    #[test]
    fn page_never_splits_equal_timestamps() {
        let mut table = RecordTable::new();
        table.write_exact(record("a", 10));
        table.write_exact(record("b", 20));
        table.write_exact(record("c", 20));
        table.write_exact(record("d", 20));
        table.write_exact(record("e", 30));

        let (page, has_more) = table.page(&task(), None, 2);
        let ids: Vec<_> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(has_more);

        let (rest, has_more) = table.page(&task(), Some(Timestamp(20)), 2);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "e");
        assert!(!has_more);
    }

    proptest! {
        #[test]
        fn paging_to_the_end_sees_every_record(
            stamps in prop::collection::vec(0u64..20, 1..40),
            limit in 1usize..6,
        ) {
            let mut table = RecordTable::new();
            for (i, ts) in stamps.iter().enumerate() {
                table.write_exact(record(&format!("r{i}"), *ts));
            }

            let mut cursor = None;
            let mut seen = 0;
            loop {
                let (page, has_more) = table.page(&task(), cursor, limit);
                seen += page.len();
                if let Some(max) = page.iter().map(|r| r.updated_at).max() {
                    cursor = Some(max);
                }
                if !has_more {
                    break;
                }
            }
            prop_assert_eq!(seen, stamps.len());
        }
    }
}
