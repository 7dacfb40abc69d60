//! Pull coordinator.
//!
//! Fetches remote changes after the stored cursor page by page, merges each
//! page through the conflict resolver and then moves the cursor to the
//! largest `updated_at` on the page.

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::report::PullReport;
use crate::store::{CursorStore, RecordStore};
use fieldsync_protocol::{resolve, EntityType, PullPage, Timestamp};
use std::time::Duration;
use tracing::{debug, warn};

/// Pulls remote changes for one entity type.
pub struct PullCoordinator<'a, S: ?Sized, R: ?Sized> {
    store: &'a S,
    remote: &'a R,
    clock: &'a dyn Clock,
    timeout: Duration,
}

impl<'a, S, R> PullCoordinator<'a, S, R>
where
    S: RecordStore + CursorStore + ?Sized,
    R: RemoteStore + ?Sized,
{
    /// Creates a coordinator. `timeout` bounds each page request.
    pub fn new(store: &'a S, remote: &'a R, clock: &'a dyn Clock, timeout: Duration) -> Self {
        Self {
            store,
            remote,
            clock,
            timeout,
        }
    }

    /// Pulls up to `max_pages` pages of at most `page_limit` records.
    ///
    /// The cursor only moves after a page is merged, so a failure or
    /// cancellation part-way through re-fetches the unmerged page next time.
    /// A transient failure stops the pass and is reported in
    /// [`PullReport::transient_error`].
    pub async fn pull_since(
        &self,
        entity_type: &EntityType,
        page_limit: usize,
        max_pages: u32,
        cancel: &CancelToken,
    ) -> SyncResult<PullReport> {
        let cursor_before = self
            .store
            .get_cursor(entity_type)?
            .map(|c| c.last_pulled_at);
        let mut report = PullReport {
            cursor_before,
            cursor_after: cursor_before,
            ..PullReport::default()
        };
        let mut cursor = cursor_before;

        while report.pages < max_pages {
            cancel.check()?;

            let page = match self.fetch(entity_type, cursor, page_limit).await {
                Ok(page) => page,
                Err(e) if e.is_retryable() => {
                    warn!(%entity_type, error = %e, "pull failed, cursor unchanged");
                    report.transient_error = Some(e.to_string());
                    break;
                }
                Err(e) => return Err(e),
            };
            report.pages += 1;
            report.received += page.len() as u64;

            let Some(max_seen) = page.max_updated_at() else {
                report.exhausted = true;
                break;
            };

            let synced_at = self.clock.now();
            let outcome =
                self.store
                    .upsert_from_remote(entity_type, &page.records, synced_at, &resolve)?;
            report.merge.absorb(outcome);

            let advanced = self.store.advance_cursor(entity_type, max_seen)?;
            let moved = cursor.map_or(true, |c| advanced > c);
            cursor = Some(advanced);
            report.cursor_after = cursor;
            debug!(
                %entity_type,
                records = page.len(),
                applied = outcome.applied,
                cursor = %advanced,
                "merged page"
            );

            if page.len() < page_limit || !page.has_more {
                report.exhausted = true;
                break;
            }
            if !moved {
                warn!(%entity_type, "remote returned no records past the cursor");
                break;
            }
        }

        Ok(report)
    }

    async fn fetch(
        &self,
        entity_type: &EntityType,
        since: Option<Timestamp>,
        limit: usize,
    ) -> SyncResult<PullPage> {
        match tokio::time::timeout(self.timeout, self.remote.pull_page(entity_type, since, limit))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;
    use crate::remote::{MockFailure, MockRemote};
    use fieldsync_protocol::SyncableRecord;

    fn task() -> EntityType {
        EntityType::new("task")
    }

    fn remote_record(id: &str, updated_at: u64, payload: u8) -> SyncableRecord {
        SyncableRecord::remote(task(), id, vec![payload], Timestamp(updated_at))
    }

    fn clock() -> ManualClock {
        ManualClock::new(Timestamp(10_000))
    }

    #[tokio::test]
    async fn pulls_all_pages_and_advances_cursor() {
        let store = MemoryStore::new();
        let remote = MockRemote::new();
        for i in 0..7u8 {
            remote.seed(remote_record(&format!("r{i}"), 100 + i as u64, i));
        }
        let clock = clock();

        let pull = PullCoordinator::new(&store, &remote, &clock, Duration::from_secs(5));
        let report = pull
            .pull_since(&task(), 3, 10, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.pages, 3);
        assert_eq!(report.received, 7);
        assert_eq!(report.merge.applied, 7);
        assert!(report.exhausted);
        assert_eq!(report.cursor_before, None);
        assert_eq!(report.cursor_after, Some(Timestamp(106)));
        assert_eq!(
            store.get_cursor(&task()).unwrap().unwrap().last_pulled_at,
            Timestamp(106)
        );

        let again = pull
            .pull_since(&task(), 3, 10, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(again.received, 0);
        assert_eq!(again.cursor_after, Some(Timestamp(106)));
    }

    #[tokio::test]
    async fn dirty_local_record_survives_pull() {
        let store = MemoryStore::new();
        store
            .write_local(&task(), "a", vec![1], false, Timestamp(50))
            .unwrap();
        let remote = MockRemote::new();
        remote.seed(remote_record("a", 900, 2));
        let clock = clock();

        let pull = PullCoordinator::new(&store, &remote, &clock, Duration::from_secs(5));
        let report = pull
            .pull_since(&task(), 10, 10, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.merge.kept_dirty, 1);
        let a = store.get_record(&task(), "a").unwrap().unwrap();
        assert!(a.dirty);
        assert_eq!(a.payload, vec![1]);
        // The cursor still moves past the shadowed version.
        assert_eq!(report.cursor_after, Some(Timestamp(900)));
    }

    #[tokio::test]
    async fn transient_failure_keeps_cursor() {
        let store = MemoryStore::new();
        let remote = MockRemote::new();
        remote.seed(remote_record("a", 100, 1));
        remote.fail_next_pull(MockFailure::Transient("503".into()));
        let clock = clock();

        let pull = PullCoordinator::new(&store, &remote, &clock, Duration::from_secs(5));
        let report = pull
            .pull_since(&task(), 10, 10, &CancelToken::new())
            .await
            .unwrap();

        assert!(report.transient_error.is_some());
        assert_eq!(report.pages, 0);
        assert!(store.get_cursor(&task()).unwrap().is_none());
        assert!(store.get_record(&task(), "a").unwrap().is_none());
    }

    #[tokio::test]
    async fn page_budget_stops_early() {
        let store = MemoryStore::new();
        let remote = MockRemote::new();
        for i in 0..10u8 {
            remote.seed(remote_record(&format!("r{i}"), 100 + i as u64, i));
        }
        let clock = clock();

        let pull = PullCoordinator::new(&store, &remote, &clock, Duration::from_secs(5));
        let report = pull
            .pull_since(&task(), 2, 2, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.pages, 2);
        assert!(!report.exhausted);
        assert_eq!(report.cursor_after, Some(Timestamp(103)));
    }

    #[tokio::test]
    async fn cancelled_pull_does_not_fetch() {
        let store = MemoryStore::new();
        let remote = MockRemote::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let clock = clock();

        let pull = PullCoordinator::new(&store, &remote, &clock, Duration::from_secs(5));
        let err = pull.pull_since(&task(), 10, 10, &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(remote.pull_calls(), 0);
    }
}
