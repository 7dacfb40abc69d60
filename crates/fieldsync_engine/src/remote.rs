//! Remote store adapter.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use fieldsync_protocol::{
    DispatchOutcome, EntityType, IdempotencyToken, OutboxEntry, PullPage, PushAck,
    SyncableRecord, Timestamp,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// The network boundary to the remote store.
///
/// Implementations report transient problems (connectivity, 5xx) as
/// retryable [`SyncError`]s. Per-record validation failures are not errors:
/// they come back as rejected [`PushAck`]s or [`DispatchOutcome::Rejected`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Writes a batch of records. Returns one ack per record the remote
    /// processed; records without an ack stay dirty.
    async fn push_batch(
        &self,
        entity_type: &EntityType,
        records: Vec<SyncableRecord>,
    ) -> SyncResult<Vec<PushAck>>;

    /// Returns records with `updated_at > since`, ascending, at most about
    /// `limit` of them. A run of equal `updated_at` values is never split
    /// across pages.
    async fn pull_page(
        &self,
        entity_type: &EntityType,
        since: Option<Timestamp>,
        limit: usize,
    ) -> SyncResult<PullPage>;

    /// Delivers one outbox operation. Delivering the same token twice must
    /// have a single remote effect.
    async fn dispatch(
        &self,
        entry: &OutboxEntry,
        token: &IdempotencyToken,
    ) -> SyncResult<DispatchOutcome>;
}

/// Scripted failure for the next call of a [`MockRemote`] operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Fail with a retryable transport error.
    Transient(String),
    /// Fail with a non-retryable transport error.
    Fatal(String),
}

impl MockFailure {
    fn into_error(self) -> SyncError {
        match self {
            MockFailure::Transient(message) => SyncError::transport_retryable(message),
            MockFailure::Fatal(message) => SyncError::transport_fatal(message),
        }
    }
}

type PushHook = Box<dyn Fn(&[SyncableRecord]) + Send + Sync>;

/// A scriptable remote store for unit tests.
///
/// Accepted pushes land in an internal table that later pulls read from, so
/// push-then-pull round trips behave like a real remote. Stored records are
/// restamped with `max(server_time, high_water + 1)` and acked with that
/// stamp.
#[derive(Default)]
pub struct MockRemote {
    connected: AtomicBool,
    table: Mutex<BTreeMap<(EntityType, String), SyncableRecord>>,
    reject: Mutex<HashMap<String, String>>,
    push_failures: Mutex<VecDeque<MockFailure>>,
    pull_failures: Mutex<VecDeque<MockFailure>>,
    dispatch_script: Mutex<VecDeque<Result<DispatchOutcome, MockFailure>>>,
    push_hook: Mutex<Option<PushHook>>,
    delivered_tokens: Mutex<HashSet<IdempotencyToken>>,
    effects: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    server_time: Mutex<Timestamp>,
    high_water: Mutex<Timestamp>,
    push_calls: AtomicUsize,
    pull_calls: AtomicUsize,
    dispatch_calls: AtomicUsize,
}

impl MockRemote {
    /// Creates a connected mock remote.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            server_time: Mutex::new(Timestamp(1_000)),
            ..Self::default()
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Sets the remote clock used to stamp accepted writes.
    pub fn set_server_time(&self, now: Timestamp) {
        *self.server_time.lock() = now;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Rejects pushes of the given record id with `reason`.
    pub fn reject_id(&self, id: impl Into<String>, reason: impl Into<String>) {
        self.reject.lock().insert(id.into(), reason.into());
    }

    /// Fails the next push call.
    pub fn fail_next_push(&self, failure: MockFailure) {
        self.push_failures.lock().push_back(failure);
    }

    /// Fails the next pull call.
    pub fn fail_next_pull(&self, failure: MockFailure) {
        self.pull_failures.lock().push_back(failure);
    }

    /// Scripts the result of the next dispatch that is not a duplicate.
    pub fn script_dispatch(&self, result: Result<DispatchOutcome, MockFailure>) {
        self.dispatch_script.lock().push_back(result);
    }

    /// Runs `hook` with the batch after the remote received it and before it
    /// acknowledges it.
    pub fn on_push(&self, hook: impl Fn(&[SyncableRecord]) + Send + Sync + 'static) {
        *self.push_hook.lock() = Some(Box::new(hook));
    }

    /// Stores a record as if another device had pushed it.
    pub fn seed(&self, record: SyncableRecord) {
        let mut record = record;
        record.dirty = false;
        let mut high_water = self.high_water.lock();
        *high_water = (*high_water).max(record.updated_at);
        self.table
            .lock()
            .insert((record.entity_type.clone(), record.id.clone()), record);
    }

    /// Returns the remote copy of a record.
    pub fn record(&self, entity_type: &EntityType, id: &str) -> Option<SyncableRecord> {
        self.table
            .lock()
            .get(&(entity_type.clone(), id.to_string()))
            .cloned()
    }

    /// Number of distinct dispatched side effects.
    pub fn effect_count(&self) -> usize {
        self.effects.load(Ordering::SeqCst)
    }

    /// Number of push calls made.
    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Number of pull calls made.
    pub fn pull_calls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    /// Number of dispatch calls made.
    pub fn dispatch_calls(&self) -> usize {
        self.dispatch_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> SyncResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn push_batch(
        &self,
        entity_type: &EntityType,
        records: Vec<SyncableRecord>,
    ) -> SyncResult<Vec<PushAck>> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        if let Some(failure) = self.push_failures.lock().pop_front() {
            return Err(failure.into_error());
        }

        if let Some(hook) = self.push_hook.lock().as_ref() {
            hook(&records);
        }

        let server_time = *self.server_time.lock();
        let reject = self.reject.lock().clone();
        let mut high_water = self.high_water.lock();
        let mut table = self.table.lock();
        let acks = records
            .into_iter()
            .map(|record| match reject.get(&record.id) {
                Some(reason) => PushAck::rejected(record.id, server_time, reason.clone()),
                None => {
                    let stamp = server_time.max(high_water.next());
                    *high_water = stamp;
                    let id = record.id.clone();
                    let mut stored = record;
                    stored.updated_at = stamp;
                    stored.dirty = false;
                    stored.synced_at = None;
                    table.insert((entity_type.clone(), id.clone()), stored);
                    PushAck::accepted(id, stamp)
                }
            })
            .collect();
        Ok(acks)
    }

    async fn pull_page(
        &self,
        entity_type: &EntityType,
        since: Option<Timestamp>,
        limit: usize,
    ) -> SyncResult<PullPage> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        if let Some(failure) = self.pull_failures.lock().pop_front() {
            return Err(failure.into_error());
        }

        let since = since.unwrap_or(Timestamp::ZERO);
        let mut matching: Vec<SyncableRecord> = self
            .table
            .lock()
            .iter()
            .filter(|((ty, _), r)| ty == entity_type && r.updated_at > since)
            .map(|(_, r)| r.clone())
            .collect();
        matching.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));

        let has_more = matching.len() > limit;
        matching.truncate(limit);
        Ok(PullPage::new(matching, has_more))
    }

    async fn dispatch(
        &self,
        _entry: &OutboxEntry,
        token: &IdempotencyToken,
    ) -> SyncResult<DispatchOutcome> {
        self.dispatch_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        if self.delivered_tokens.lock().contains(token) {
            return Ok(DispatchOutcome::Delivered { duplicate: true });
        }

        let scripted = self.dispatch_script.lock().pop_front();
        match scripted {
            Some(Err(failure)) => Err(failure.into_error()),
            Some(Ok(outcome @ DispatchOutcome::Rejected { .. })) => Ok(outcome),
            Some(Ok(DispatchOutcome::Delivered { .. })) | None => {
                self.delivered_tokens.lock().insert(token.clone());
                self.effects.fetch_add(1, Ordering::SeqCst);
                Ok(DispatchOutcome::Delivered { duplicate: false })
            }
        }
    }
}
