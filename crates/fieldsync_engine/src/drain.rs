//! Outbox drain.
//!
//! Claims due entries, dispatches them concurrently and settles each one:
//! delivered entries complete, rejected entries fail, and transient failures
//! requeue with exponential backoff until the attempt budget runs out.
//! Every attempt reuses the entry's idempotency token, so a delivery whose
//! acknowledgement was lost is recognised as a duplicate on the next try.

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::{OutboxConfig, RetryConfig};
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::report::{DrainReport, EntryFailure};
use crate::store::OutboxLog;
use fieldsync_protocol::{DispatchOutcome, OutboxEntry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Drains the outbox log against a remote store.
pub struct OutboxDrainer<S: ?Sized, R: ?Sized> {
    store: Arc<S>,
    remote: Arc<R>,
    clock: Arc<dyn Clock>,
    config: OutboxConfig,
    timeout: Duration,
}

impl<S, R> OutboxDrainer<S, R>
where
    S: OutboxLog + ?Sized + 'static,
    R: RemoteStore + ?Sized + 'static,
{
    /// Creates a drainer. `timeout` bounds each dispatch.
    pub fn new(
        store: Arc<S>,
        remote: Arc<R>,
        clock: Arc<dyn Clock>,
        config: OutboxConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            clock,
            config,
            timeout,
        }
    }

    /// Runs one drain pass.
    ///
    /// Entries claimed by a pass that never finished are first returned to
    /// `PENDING`. Cancellation stops further claims; dispatches already in
    /// flight are settled before returning.
    pub async fn drain(&self, retry: &RetryConfig, cancel: &CancelToken) -> SyncResult<DrainReport> {
        let mut report = DrainReport::default();

        let stale_before = self.clock.now().saturating_sub(self.config.in_flight_timeout);
        let recovered = self.store.recover_stale_in_flight(stale_before)?;
        if recovered > 0 {
            warn!(recovered, "recovered abandoned outbox claims");
        }
        report.recovered_stale = recovered as u64;

        for round in 0..self.config.max_rounds {
            if cancel.is_cancelled() {
                debug!(round, "drain cancelled");
                break;
            }

            let claimed = self
                .store
                .claim_outbox_entries(self.config.concurrency, self.clock.now())?;
            if claimed.is_empty() {
                break;
            }
            report.claimed += claimed.len() as u64;
            debug!(round, count = claimed.len(), "dispatching outbox entries");

            let mut tasks = JoinSet::new();
            for entry in claimed {
                let remote = Arc::clone(&self.remote);
                let timeout = self.timeout;
                tasks.spawn(async move {
                    let call = remote.dispatch(&entry, &entry.idempotency_token);
                    let result = match tokio::time::timeout(timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(SyncError::Timeout),
                    };
                    (entry, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((entry, result)) => self.settle(entry, result, retry, &mut report)?,
                    // The entry stays IN_FLIGHT and is recovered by a later pass.
                    Err(e) => error!(error = %e, "dispatch task failed"),
                }
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                delivered = report.delivered,
                requeued = report.requeued,
                failed = report.failed_permanently + report.exhausted,
                "outbox drain finished"
            );
        }
        Ok(report)
    }

    fn settle(
        &self,
        entry: OutboxEntry,
        result: SyncResult<DispatchOutcome>,
        retry: &RetryConfig,
        report: &mut DrainReport,
    ) -> SyncResult<()> {
        let id = entry.entry_id;
        match result {
            Ok(DispatchOutcome::Delivered { duplicate }) => {
                self.store.complete_outbox_entry(id, self.clock.now())?;
                report.delivered += 1;
                if duplicate {
                    debug!(%id, "remote already had this delivery");
                    report.duplicates += 1;
                }
            }
            Ok(DispatchOutcome::Rejected { reason }) => {
                warn!(%id, %reason, "outbox entry rejected");
                self.store.fail_outbox_entry(id, &reason)?;
                report.failed_permanently += 1;
                report.failures.push(EntryFailure { entry_id: id, reason });
            }
            Err(e) if e.is_retryable() => {
                if entry.retry_count >= retry.max_attempts {
                    let reason = format!("gave up after {} attempts: {e}", entry.retry_count);
                    warn!(%id, %reason, "outbox entry exhausted its retries");
                    self.store.fail_outbox_entry(id, &reason)?;
                    report.exhausted += 1;
                    report.failures.push(EntryFailure { entry_id: id, reason });
                } else {
                    let delay = retry.delay_for_attempt(entry.retry_count);
                    let next_at = self.clock.now().saturating_add(delay);
                    debug!(%id, attempt = entry.retry_count, ?delay, error = %e, "requeueing outbox entry");
                    self.store
                        .requeue_outbox_entry(id, next_at, Some(e.to_string()))?;
                    report.requeued += 1;
                }
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(%id, %reason, "outbox dispatch failed permanently");
                self.store.fail_outbox_entry(id, &reason)?;
                report.failed_permanently += 1;
                report.failures.push(EntryFailure { entry_id: id, reason });
            }
        }
        Ok(())
    }
}
