//! Push coordinator.
//!
//! Sends a snapshot of dirty records and clears each one with a
//! compare-and-clear on the `updated_at` that was sent, so a local write
//! landing during the network call is never lost. A cleared record takes the
//! stamp the remote acked it with.

use crate::clock::Clock;
use crate::error::{StoreError, SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::report::{PushReport, RecordRejection};
use crate::store::RecordStore;
use fieldsync_protocol::{EntityType, Timestamp};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// Pushes dirty records of one entity type.
pub struct PushCoordinator<'a, S: ?Sized, R: ?Sized> {
    store: &'a S,
    remote: &'a R,
    clock: &'a dyn Clock,
    timeout: Duration,
}

impl<'a, S, R> PushCoordinator<'a, S, R>
where
    S: RecordStore + ?Sized,
    R: RemoteStore + ?Sized,
{
    /// Creates a coordinator. `timeout` bounds each network call.
    pub fn new(store: &'a S, remote: &'a R, clock: &'a dyn Clock, timeout: Duration) -> Self {
        Self {
            store,
            remote,
            clock,
            timeout,
        }
    }

    /// Pushes one batch of at most `batch_size` dirty records.
    ///
    /// Transient transport failures are reported in
    /// [`PushReport::transient_error`] with every record left dirty. Only
    /// non-retryable transport failures and store failures are returned as
    /// errors.
    pub async fn push_dirty(
        &self,
        entity_type: &EntityType,
        batch_size: usize,
    ) -> SyncResult<PushReport> {
        let mut report = PushReport::default();

        let refs = self.store.list_dirty(entity_type, batch_size)?;
        if refs.is_empty() {
            return Ok(report);
        }
        let records = self.store.fetch_dirty(entity_type, &refs)?;
        if records.is_empty() {
            return Ok(report);
        }

        let sent: HashMap<String, Timestamp> = records
            .iter()
            .map(|r| (r.id.clone(), r.updated_at))
            .collect();
        report.batches = 1;
        report.attempted = records.len() as u64;
        debug!(%entity_type, count = records.len(), "pushing dirty records");

        let call = self.remote.push_batch(entity_type, records);
        let acks = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(acks)) => acks,
            Ok(Err(e)) if e.is_retryable() => {
                warn!(%entity_type, error = %e, "push failed, records stay dirty");
                report.deferred = report.attempted;
                report.transient_error = Some(e.to_string());
                return Ok(report);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(%entity_type, "push timed out, records stay dirty");
                report.deferred = report.attempted;
                report.transient_error = Some(SyncError::Timeout.to_string());
                return Ok(report);
            }
        };

        let now = self.clock.now();
        let mut acked = HashSet::new();
        for ack in acks {
            let Some(&expected) = sent.get(&ack.id) else {
                warn!(%entity_type, id = %ack.id, "ack for a record that was not sent");
                continue;
            };
            if !acked.insert(ack.id.clone()) {
                continue;
            }

            if ack.accepted {
                // The record adopts the server stamp; synced_at stays on the
                // local clock.
                let synced_at = ack.server_time.min(now);
                match self.store.compare_and_clear_dirty(
                    entity_type,
                    &ack.id,
                    expected,
                    ack.server_time,
                    synced_at,
                ) {
                    Ok(true) => report.pushed += 1,
                    Ok(false) => {
                        debug!(%entity_type, id = %ack.id, "record rewritten during push, left dirty");
                        report.skipped_concurrent += 1;
                    }
                    Err(StoreError::RecordNotFound { .. }) => report.skipped_concurrent += 1,
                    Err(e) => return Err(e.into()),
                }
            } else {
                let reason = ack
                    .error
                    .unwrap_or_else(|| "rejected by remote".to_string());
                if self
                    .store
                    .mark_rejected(entity_type, &ack.id, expected, &reason)?
                {
                    warn!(%entity_type, id = %ack.id, %reason, "record rejected by remote");
                    report.rejected += 1;
                    report.rejections.push(RecordRejection {
                        id: ack.id,
                        reason,
                    });
                } else {
                    report.skipped_concurrent += 1;
                }
            }
        }
        report.deferred = report.attempted - acked.len() as u64;

        Ok(report)
    }
}
