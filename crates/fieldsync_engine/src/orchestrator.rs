//! Sync orchestrator.
//!
//! Runs push-then-pull cycles per entity type, at most one at a time per
//! type, and drains the outbox on its own schedule. Callers that ask for a
//! type whose cycle is already running join that cycle and get its report.

use crate::cancel::CancelToken;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::drain::OutboxDrainer;
use crate::error::{SyncError, SyncResult};
use crate::pull::PullCoordinator;
use crate::push::PushCoordinator;
use crate::remote::RemoteStore;
use crate::report::{CycleOutcome, DrainReport, EntityReport, SyncReport};
use crate::status::{CycleState, SyncStatus};
use crate::store::LocalStore;
use crate::typed::TypedRecords;
use fieldsync_protocol::{
    EntityType, OperationKind, OutboxEntry, Syncable, SyncableRecord, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Entity-type cycles that completed.
    pub cycles_completed: u64,
    /// Entity-type cycles that failed.
    pub cycles_failed: u64,
    /// Records accepted by the remote store.
    pub records_pushed: u64,
    /// Remote records written locally.
    pub records_pulled: u64,
    /// Remote versions shadowed by dirty local records.
    pub conflicts_kept_local: u64,
    /// Records rejected by the remote store.
    pub records_rejected: u64,
    /// Outbox entries delivered.
    pub outbox_delivered: u64,
    /// Outbox entries that ended in `FAILED`.
    pub outbox_failed: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    failures: u32,
    not_before: Timestamp,
}

type InFlight = Mutex<HashMap<EntityType, watch::Receiver<Option<EntityReport>>>>;

/// Removes the in-flight marker when a cycle ends, even if it is aborted.
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    entity_type: EntityType,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.entity_type);
    }
}

struct Inner<S: ?Sized, R: ?Sized> {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    entity_types: RwLock<BTreeSet<EntityType>>,
    in_flight: InFlight,
    backoff: Mutex<HashMap<EntityType, Backoff>>,
    status_tx: broadcast::Sender<SyncStatus>,
    drain_lock: tokio::sync::Mutex<()>,
    stats: RwLock<SyncStats>,
    store: Arc<S>,
    remote: Arc<R>,
}

/// Coordinates sync for a set of registered entity types.
///
/// Cheap to clone; clones share state.
pub struct SyncOrchestrator<S: ?Sized, R: ?Sized> {
    inner: Arc<Inner<S, R>>,
}

impl<S: ?Sized, R: ?Sized> Clone for SyncOrchestrator<S, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Handle to a sync run started with [`SyncOrchestrator::spawn_sync`].
pub struct SyncHandle {
    cancel: CancelToken,
    join: JoinHandle<SyncResult<SyncReport>>,
}

impl SyncHandle {
    /// Asks the run to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the run has finished.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the run to finish.
    pub async fn join(self) -> SyncResult<SyncReport> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(SyncError::Cancelled),
            Err(e) => Err(SyncError::TaskFailed(e.to_string())),
        }
    }
}

impl<S, R> SyncOrchestrator<S, R>
where
    S: LocalStore + ?Sized + 'static,
    R: RemoteStore + ?Sized + 'static,
{
    /// Creates an orchestrator using the system clock.
    pub fn new(config: SyncConfig, store: Arc<S>, remote: Arc<R>) -> Self {
        Self::with_clock(config, store, remote, Arc::new(SystemClock))
    }

    /// Creates an orchestrator with an explicit clock.
    pub fn with_clock(
        config: SyncConfig,
        store: Arc<S>,
        remote: Arc<R>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(config.status_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                entity_types: RwLock::new(BTreeSet::new()),
                in_flight: Mutex::new(HashMap::new()),
                backoff: Mutex::new(HashMap::new()),
                status_tx,
                drain_lock: tokio::sync::Mutex::new(()),
                stats: RwLock::new(SyncStats::default()),
                store,
                remote,
            }),
        }
    }

    /// Registers an entity type for sync.
    pub fn register(&self, entity_type: impl Into<EntityType>) {
        self.inner.entity_types.write().insert(entity_type.into());
    }

    /// Registers a [`Syncable`] type for sync.
    pub fn register_syncable<T: Syncable>(&self) {
        self.register(T::entity_type());
    }

    /// Returns the registered entity types in order.
    pub fn entity_types(&self) -> Vec<EntityType> {
        self.inner.entity_types.read().iter().cloned().collect()
    }

    /// Returns a typed view for reading and writing `T` records locally.
    pub fn records<T: Syncable>(&self) -> TypedRecords<T, S> {
        TypedRecords::new(Arc::clone(&self.inner.store), Arc::clone(&self.inner.clock))
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Gets the local store.
    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// Gets the remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.inner.remote
    }

    /// Gets the clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Subscribes to status updates.
    ///
    /// Slow subscribers miss old updates rather than blocking sync.
    pub fn observe_sync_status(&self) -> broadcast::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Returns the current state of one entity type.
    pub fn state(&self, entity_type: &EntityType) -> CycleState {
        if self.inner.in_flight.lock().contains_key(entity_type) {
            CycleState::Running
        } else if self.backoff_until(entity_type).is_some() {
            CycleState::BackingOff
        } else {
            CycleState::Idle
        }
    }

    /// Number of dirty records of one type.
    pub fn pending_count(&self, entity_type: &EntityType) -> SyncResult<usize> {
        Ok(self.inner.store.pending_count(entity_type)?)
    }

    /// Runs one push-then-pull cycle for each requested type, or for every
    /// registered type when `entity_types` is `None`.
    ///
    /// Types run concurrently. Per-type failures are reported in the
    /// returned [`SyncReport`]; only an unknown type is an error.
    pub async fn run_sync(&self, entity_types: Option<&[EntityType]>) -> SyncResult<SyncReport> {
        self.run_sync_with(entity_types, &CancelToken::new()).await
    }

    /// Like [`run_sync`](Self::run_sync), stopping early once `cancel` fires.
    pub async fn run_sync_with(
        &self,
        entity_types: Option<&[EntityType]>,
        cancel: &CancelToken,
    ) -> SyncResult<SyncReport> {
        let started = Instant::now();
        let targets = self.targets(entity_types)?;

        let mut tasks = JoinSet::new();
        for entity_type in targets {
            let this = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { this.sync_entity(entity_type, &cancel).await });
        }

        let mut entities = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => entities.push(report),
                Err(e) => error!(error = %e, "entity sync task failed"),
            }
        }
        entities.sort_by(|a, b| a.entity_type.cmp(&b.entity_type));

        let report = SyncReport {
            entities,
            outbox: None,
            duration: started.elapsed(),
        };
        self.record_sync(&report);
        info!(
            types = report.entities.len(),
            pushed = report.pushed(),
            pulled = report.pulled(),
            failed = report.failed_permanently(),
            retries = report.retries_scheduled(),
            "sync run finished"
        );
        Ok(report)
    }

    /// Runs sync and an outbox drain side by side.
    pub async fn run_sync_and_drain(
        &self,
        entity_types: Option<&[EntityType]>,
    ) -> SyncResult<SyncReport> {
        let cancel = CancelToken::new();
        let (sync, drain) = tokio::join!(
            self.run_sync_with(entity_types, &cancel),
            self.drain_outbox_with(&cancel)
        );
        let mut report = sync?;
        report.outbox = Some(drain?);
        Ok(report)
    }

    /// Starts a sync run in the background.
    pub fn spawn_sync(&self, entity_types: Option<Vec<EntityType>>) -> SyncHandle {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let this = self.clone();
        let join =
            tokio::spawn(async move { this.run_sync_with(entity_types.as_deref(), &token).await });
        SyncHandle { cancel, join }
    }

    /// Drains the outbox once.
    ///
    /// Returns a skipped report if another drain is already running.
    pub async fn drain_outbox(&self) -> SyncResult<DrainReport> {
        self.drain_outbox_with(&CancelToken::new()).await
    }

    /// Like [`drain_outbox`](Self::drain_outbox), stopping early once
    /// `cancel` fires.
    pub async fn drain_outbox_with(&self, cancel: &CancelToken) -> SyncResult<DrainReport> {
        let Ok(_guard) = self.inner.drain_lock.try_lock() else {
            debug!("outbox drain already running");
            return Ok(DrainReport::skipped());
        };

        let config = &self.inner.config;
        let drainer = OutboxDrainer::new(
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.remote),
            Arc::clone(&self.inner.clock),
            config.outbox.clone(),
            config.request_timeout,
        );
        let report = drainer.drain(&config.retry, cancel).await?;

        let mut stats = self.inner.stats.write();
        stats.outbox_delivered += report.delivered;
        stats.outbox_failed += report.failed_permanently + report.exhausted;
        if let Some(failure) = report.failures.last() {
            stats.last_error = Some(failure.reason.clone());
        }
        Ok(report)
    }

    /// Appends a side-effecting operation to the outbox.
    pub fn enqueue_outbox(
        &self,
        entity_type: impl Into<EntityType>,
        kind: OperationKind,
        payload: Vec<u8>,
        owner_id: impl Into<String>,
    ) -> SyncResult<OutboxEntry> {
        let entry = OutboxEntry::new(
            entity_type.into(),
            kind,
            payload,
            owner_id,
            self.inner.clock.now(),
        );
        self.inner.store.enqueue_outbox_entry(entry.clone())?;
        debug!(entry_id = %entry.entry_id, kind = %entry.kind, "enqueued outbox entry");
        Ok(entry)
    }

    /// Moves a `FAILED` outbox entry back to `PENDING` with a fresh budget.
    pub fn rearm_outbox_entry(&self, entry_id: Uuid) -> SyncResult<()> {
        self.inner.store.rearm_outbox_entry(entry_id)?;
        info!(%entry_id, "outbox entry rearmed");
        Ok(())
    }

    /// Deletes `COMPLETED` entries older than the configured retention.
    pub fn purge_outbox(&self) -> SyncResult<usize> {
        let before = self
            .inner
            .clock
            .now()
            .saturating_sub(self.inner.config.outbox.retention);
        let purged = self.inner.store.purge_completed(before)?;
        if purged > 0 {
            info!(purged, "purged completed outbox entries");
        }
        Ok(purged)
    }

    /// Physically removes tombstones the remote store has confirmed.
    pub fn purge_tombstones(&self, entity_type: &EntityType) -> SyncResult<usize> {
        let purged = self.inner.store.purge_tombstones(entity_type)?;
        if purged > 0 {
            info!(%entity_type, purged, "purged tombstones");
        }
        Ok(purged)
    }

    /// Clears the pull cursor so the next cycle re-fetches everything.
    pub fn reset_cursor(&self, entity_type: &EntityType) -> SyncResult<()> {
        self.inner.store.reset_cursor(entity_type)?;
        info!(%entity_type, "pull cursor reset");
        Ok(())
    }

    /// Returns records the remote store rejected.
    pub fn rejected_records(&self, entity_type: &EntityType) -> SyncResult<Vec<SyncableRecord>> {
        Ok(self.inner.store.rejected_records(entity_type)?)
    }

    /// Clears a rejection so the record is pushed again.
    pub fn retry_rejected(&self, entity_type: &EntityType, id: &str) -> SyncResult<bool> {
        Ok(self.inner.store.clear_rejection(entity_type, id)?)
    }

    fn targets(&self, requested: Option<&[EntityType]>) -> SyncResult<Vec<EntityType>> {
        let registered = self.inner.entity_types.read();
        let Some(requested) = requested else {
            return Ok(registered.iter().cloned().collect());
        };

        let mut targets: Vec<EntityType> = Vec::with_capacity(requested.len());
        for entity_type in requested {
            if !registered.contains(entity_type) {
                return Err(SyncError::UnknownEntityType(entity_type.clone()));
            }
            if !targets.contains(entity_type) {
                targets.push(entity_type.clone());
            }
        }
        Ok(targets)
    }

    async fn sync_entity(&self, entity_type: EntityType, cancel: &CancelToken) -> EntityReport {
        let claim = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(&entity_type) {
                Some(running) => Err(running.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(entity_type.clone(), rx);
                    Ok(tx)
                }
            }
        };

        let tx = match claim {
            Ok(tx) => tx,
            Err(running) => return Self::join_running(entity_type, running).await,
        };
        let _guard = InFlightGuard {
            in_flight: &self.inner.in_flight,
            entity_type: entity_type.clone(),
        };

        let report = self.run_cycle(&entity_type, cancel).await;
        tx.send_replace(Some(report.clone()));
        report
    }

    async fn join_running(
        entity_type: EntityType,
        mut running: watch::Receiver<Option<EntityReport>>,
    ) -> EntityReport {
        debug!(%entity_type, "joining running sync cycle");
        let finished = running
            .wait_for(Option::is_some)
            .await
            .map(|report| report.as_ref().cloned());

        let mut report = match finished {
            Ok(Some(report)) => report,
            // The running cycle was dropped before it finished.
            _ => EntityReport::cancelled(entity_type),
        };
        report.joined = true;
        report
    }

    async fn run_cycle(&self, entity_type: &EntityType, cancel: &CancelToken) -> EntityReport {
        let started = Instant::now();
        let mut report = EntityReport::new(entity_type.clone());

        if let Some(not_before) = self.backoff_until(entity_type) {
            debug!(%entity_type, %not_before, "backing off, cycle skipped");
            report.outcome = CycleOutcome::Deferred { not_before };
            self.publish(entity_type, CycleState::BackingOff);
            return report;
        }

        self.publish(entity_type, CycleState::Running);
        let result = self.push_then_pull(entity_type, cancel, &mut report).await;
        let outcome = match result {
            Ok(()) => match report.transient_error() {
                Some(message) => CycleOutcome::Failed {
                    error: message.to_string(),
                    retryable: true,
                },
                None => CycleOutcome::Completed,
            },
            Err(SyncError::Cancelled) => CycleOutcome::Cancelled,
            Err(e) => CycleOutcome::Failed {
                error: e.to_string(),
                retryable: e.is_retryable(),
            },
        };
        report.outcome = outcome;
        report.duration = started.elapsed();

        let state = match &report.outcome {
            CycleOutcome::Completed => {
                self.inner.backoff.lock().remove(entity_type);
                debug!(
                    %entity_type,
                    pushed = report.push.pushed,
                    pulled = report.pull.merge.applied,
                    "sync cycle completed"
                );
                CycleState::Idle
            }
            CycleOutcome::Failed {
                error: message,
                retryable: true,
            } => {
                let not_before = self.schedule_backoff(entity_type);
                warn!(%entity_type, error = %message, %not_before, "sync cycle interrupted, backing off");
                CycleState::BackingOff
            }
            CycleOutcome::Failed { error: message, .. } => {
                error!(%entity_type, error = %message, "sync cycle failed");
                CycleState::Idle
            }
            CycleOutcome::Cancelled | CycleOutcome::Deferred { .. } => CycleState::Idle,
        };
        self.publish(entity_type, state);
        report
    }

    async fn push_then_pull(
        &self,
        entity_type: &EntityType,
        cancel: &CancelToken,
        report: &mut EntityReport,
    ) -> SyncResult<()> {
        let config = &self.inner.config;
        let store = &*self.inner.store;
        let remote = &*self.inner.remote;
        let clock = &*self.inner.clock;

        let push = PushCoordinator::new(store, remote, clock, config.request_timeout);
        for _ in 0..config.max_push_batches {
            cancel.check()?;
            let batch = push.push_dirty(entity_type, config.push_batch_size).await?;
            let full = batch.attempted >= config.push_batch_size as u64;
            let progressed = batch.pushed + batch.rejected > 0;
            let interrupted = batch.transient_error.is_some();
            report.push.absorb(batch);
            if interrupted {
                // No point pulling over a link that just failed.
                return Ok(());
            }
            if !full || !progressed {
                break;
            }
        }

        cancel.check()?;
        let pull = PullCoordinator::new(store, remote, clock, config.request_timeout);
        report.pull = pull
            .pull_since(
                entity_type,
                config.pull_page_limit,
                config.max_pull_pages,
                cancel,
            )
            .await?;
        Ok(())
    }

    fn backoff_until(&self, entity_type: &EntityType) -> Option<Timestamp> {
        let now = self.inner.clock.now();
        self.inner
            .backoff
            .lock()
            .get(entity_type)
            .filter(|b| b.not_before > now)
            .map(|b| b.not_before)
    }

    fn schedule_backoff(&self, entity_type: &EntityType) -> Timestamp {
        let now = self.inner.clock.now();
        let mut backoff = self.inner.backoff.lock();
        let entry = backoff.entry(entity_type.clone()).or_insert(Backoff {
            failures: 0,
            not_before: now,
        });
        entry.failures = entry.failures.saturating_add(1);
        entry.not_before = now.saturating_add(self.inner.config.retry.delay_for_attempt(entry.failures));
        entry.not_before
    }

    fn publish(&self, entity_type: &EntityType, state: CycleState) {
        let pending_count = match self.inner.store.pending_count(entity_type) {
            Ok(count) => count,
            Err(e) => {
                warn!(%entity_type, error = %e, "could not count pending records");
                0
            }
        };
        // No subscribers is fine.
        let _ = self.inner.status_tx.send(SyncStatus {
            entity_type: entity_type.clone(),
            state,
            pending_count,
        });
    }

    fn record_sync(&self, report: &SyncReport) {
        let mut stats = self.inner.stats.write();
        for entity in report.entities.iter().filter(|e| !e.joined) {
            match &entity.outcome {
                CycleOutcome::Completed => stats.cycles_completed += 1,
                CycleOutcome::Failed { error, .. } => {
                    stats.cycles_failed += 1;
                    stats.last_error = Some(error.clone());
                }
                CycleOutcome::Deferred { .. } | CycleOutcome::Cancelled => {}
            }
            stats.records_pushed += entity.push.pushed;
            stats.records_pulled += entity.pull.merge.applied;
            stats.conflicts_kept_local += entity.pull.merge.kept_dirty;
            stats.records_rejected += entity.push.rejected;
        }
        stats.last_sync_time = Some(Instant::now());
    }
}
