//! The reference remote store.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::faults::FaultPlan;
use crate::ledger::{Effect, IdempotencyLedger};
use crate::table::RecordTable;
use async_trait::async_trait;
use fieldsync_engine::{Clock, RemoteStore, SyncResult, SystemClock};
use fieldsync_protocol::{
    DispatchOutcome, EntityType, IdempotencyToken, OutboxEntry, PullPage, PushAck,
    SyncableRecord, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

type RecordValidator = Box<dyn Fn(&SyncableRecord) -> Result<(), String> + Send + Sync>;
type DispatchValidator = Box<dyn Fn(&OutboxEntry) -> Result<(), String> + Send + Sync>;

/// Request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Push calls received.
    pub pushes: u64,
    /// Pull calls received.
    pub pulls: u64,
    /// Dispatch calls received.
    pub dispatches: u64,
    /// Dispatches answered from the idempotency ledger.
    pub duplicate_dispatches: u64,
}

#[derive(Debug, Default)]
struct Counters {
    pushes: AtomicU64,
    pulls: AtomicU64,
    dispatches: AtomicU64,
    duplicate_dispatches: AtomicU64,
}

/// An in-process remote store.
///
/// Keeps an authoritative record table with server-issued timestamps, an
/// idempotency ledger for outbox operations and a [`FaultPlan`] for
/// simulating outages.
///
/// # Example
///
/// ```
/// use fieldsync_server::{RemoteServer, ServerConfig};
///
/// let server = RemoteServer::new(ServerConfig::default())
///     .with_validator(|record| {
///         if record.payload.is_empty() {
///             Err("empty payload".into())
///         } else {
///             Ok(())
///         }
///     });
/// server.faults().fail_pushes(1);
/// ```
pub struct RemoteServer {
    config: ServerConfig,
    clock: Arc<dyn Clock>,
    table: RwLock<RecordTable>,
    ledger: Mutex<IdempotencyLedger>,
    faults: FaultPlan,
    validator: Option<RecordValidator>,
    dispatch_validator: Option<DispatchValidator>,
    counters: Counters,
}

impl RemoteServer {
    /// Creates a server using the system clock.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a server with an explicit clock.
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            table: RwLock::new(RecordTable::new()),
            ledger: Mutex::new(IdempotencyLedger::new()),
            faults: FaultPlan::new(),
            validator: None,
            dispatch_validator: None,
            counters: Counters::default(),
        }
    }

    /// Rejects pushed records for which `validator` returns an error.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&SyncableRecord) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Rejects outbox operations for which `validator` returns an error.
    pub fn with_dispatch_validator(
        mut self,
        validator: impl Fn(&OutboxEntry) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.dispatch_validator = Some(Box::new(validator));
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Gets the fault plan.
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Writes a record as another device would, with a fresh server stamp.
    pub fn put_remote(
        &self,
        entity_type: &EntityType,
        id: &str,
        payload: Vec<u8>,
        is_deleted: bool,
    ) -> SyncableRecord {
        let mut record =
            SyncableRecord::remote(entity_type.clone(), id, payload, Timestamp::ZERO);
        record.is_deleted = is_deleted;
        self.table.write().write(record, self.clock.now())
    }

    /// Writes a record keeping its `updated_at`.
    pub fn put_exact(&self, record: SyncableRecord) {
        self.table.write().write_exact(record);
    }

    /// Returns the server copy of a record.
    pub fn record(&self, entity_type: &EntityType, id: &str) -> Option<SyncableRecord> {
        self.table.read().get(entity_type, id).cloned()
    }

    /// Returns every record of a type ordered by `updated_at`.
    pub fn records(&self, entity_type: &EntityType) -> Vec<SyncableRecord> {
        self.table
            .read()
            .ordered(entity_type)
            .into_iter()
            .cloned()
            .collect()
    }

    /// All outbox effects, in application order.
    pub fn effects(&self) -> Vec<Effect> {
        self.ledger.lock().effects().to_vec()
    }

    /// Number of outbox effects applied.
    pub fn effect_count(&self) -> usize {
        self.ledger.lock().effects().len()
    }

    /// Returns the request counters.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            pushes: self.counters.pushes.load(Ordering::SeqCst),
            pulls: self.counters.pulls.load(Ordering::SeqCst),
            dispatches: self.counters.dispatches.load(Ordering::SeqCst),
            duplicate_dispatches: self.counters.duplicate_dispatches.load(Ordering::SeqCst),
        }
    }

    async fn enter(&self) -> Result<(), ServerError> {
        if let Some(latency) = self.config.latency {
            tokio::time::sleep(latency).await;
        }
        self.faults.check_online()
    }

    fn validate(&self, entity_type: &EntityType, record: &SyncableRecord) -> Result<(), String> {
        if &record.entity_type != entity_type {
            return Err(format!(
                "record {} belongs to {}, not {}",
                record.id, record.entity_type, entity_type
            ));
        }
        match &self.validator {
            Some(validator) => validator(record),
            None => Ok(()),
        }
    }

    fn accept_push(
        &self,
        entity_type: &EntityType,
        records: Vec<SyncableRecord>,
    ) -> Result<Vec<PushAck>, ServerError> {
        if records.len() > self.config.max_push_batch {
            return Err(ServerError::InvalidRequest(format!(
                "batch of {} exceeds limit {}",
                records.len(),
                self.config.max_push_batch
            )));
        }

        let now = self.clock.now();
        let mut table = self.table.write();
        let acks = records
            .into_iter()
            .map(|record| match self.validate(entity_type, &record) {
                Ok(()) => {
                    let stored = table.write(record, now);
                    PushAck::accepted(stored.id, stored.updated_at)
                }
                Err(reason) => {
                    debug!(%entity_type, id = %record.id, %reason, "rejecting record");
                    PushAck::rejected(record.id, now, reason)
                }
            })
            .collect();
        Ok(acks)
    }

    fn accept_dispatch(
        &self,
        entry: &OutboxEntry,
        token: &IdempotencyToken,
    ) -> Result<DispatchOutcome, ServerError> {
        if self.ledger.lock().effect(token).is_some() {
            self.counters
                .duplicate_dispatches
                .fetch_add(1, Ordering::SeqCst);
            return Ok(DispatchOutcome::Delivered { duplicate: true });
        }
        if let Some(fault) = self.faults.dispatch_fault() {
            return Err(fault);
        }
        if let Some(validator) = &self.dispatch_validator {
            if let Err(reason) = validator(entry) {
                return Ok(DispatchOutcome::Rejected { reason });
            }
        }

        let applied = self.ledger.lock().apply(entry, token, self.clock.now());
        if self.faults.lose_ack() {
            warn!(entry_id = %entry.entry_id, "dispatch applied, response lost");
            return Err(ServerError::Unavailable("response lost".into()));
        }
        Ok(DispatchOutcome::Delivered { duplicate: !applied })
    }
}

#[async_trait]
impl RemoteStore for RemoteServer {
    async fn push_batch(
        &self,
        entity_type: &EntityType,
        records: Vec<SyncableRecord>,
    ) -> SyncResult<Vec<PushAck>> {
        self.counters.pushes.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        if let Some(fault) = self.faults.push_fault() {
            return Err(fault.into());
        }
        Ok(self.accept_push(entity_type, records)?)
    }

    async fn pull_page(
        &self,
        entity_type: &EntityType,
        since: Option<Timestamp>,
        limit: usize,
    ) -> SyncResult<PullPage> {
        self.counters.pulls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        if let Some(fault) = self.faults.pull_fault() {
            return Err(fault.into());
        }

        let limit = limit.min(self.config.max_pull_page);
        let (records, has_more) = self.table.read().page(entity_type, since, limit);
        Ok(PullPage::new(records, has_more))
    }

    async fn dispatch(
        &self,
        entry: &OutboxEntry,
        token: &IdempotencyToken,
    ) -> SyncResult<DispatchOutcome> {
        self.counters.dispatches.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(self.accept_dispatch(entry, token)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_engine::ManualClock;
    use fieldsync_protocol::OperationKind;

    fn task() -> EntityType {
        EntityType::new("task")
    }

    fn server() -> RemoteServer {
        RemoteServer::with_clock(
            ServerConfig::default(),
            Arc::new(ManualClock::new(Timestamp(1_000))),
        )
    }

    #[tokio::test]
    async fn push_stamps_and_pull_returns() {
        let server = server();
        let records = vec![
            SyncableRecord::local(task(), "a", vec![1], Timestamp(5)),
            SyncableRecord::local(task(), "b", vec![2], Timestamp(6)),
        ];

        let acks = server.push_batch(&task(), records).await.unwrap();
        assert!(acks.iter().all(|a| a.accepted));
        assert_eq!(acks[0].server_time, Timestamp(1_000));
        assert_eq!(acks[1].server_time, Timestamp(1_001));

        let page = server.pull_page(&task(), None, 10).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(!page.has_more);
        assert!(page.records.iter().all(|r| !r.dirty));

        let empty = server
            .pull_page(&task(), page.max_updated_at(), 10)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn validator_rejects_per_record() {
        let server = server().with_validator(|r| {
            if r.payload.is_empty() {
                Err("payload required".into())
            } else {
                Ok(())
            }
        });
        let records = vec![
            SyncableRecord::local(task(), "ok", vec![1], Timestamp(5)),
            SyncableRecord::local(task(), "bad", vec![], Timestamp(5)),
            SyncableRecord::local(EntityType::new("note"), "wrong", vec![1], Timestamp(5)),
        ];

        let acks = server.push_batch(&task(), records).await.unwrap();
        assert!(acks[0].accepted);
        assert_eq!(acks[1].error.as_deref(), Some("payload required"));
        assert!(!acks[2].accepted);
        assert!(server.record(&task(), "bad").is_none());
    }

    #[tokio::test]
    async fn oversized_batch_is_a_fatal_error() {
        let server = RemoteServer::new(ServerConfig::new().with_max_push_batch(1));
        let records = vec![
            SyncableRecord::local(task(), "a", vec![1], Timestamp(5)),
            SyncableRecord::local(task(), "b", vec![1], Timestamp(5)),
        ];
        let err = server.push_batch(&task(), records).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn faults_are_retryable() {
        let server = server();
        server.faults().fail_pulls(1);
        assert!(server
            .pull_page(&task(), None, 10)
            .await
            .unwrap_err()
            .is_retryable());
        assert!(server.pull_page(&task(), None, 10).await.is_ok());

        server.faults().set_offline(true);
        assert!(server
            .push_batch(&task(), vec![])
            .await
            .unwrap_err()
            .is_retryable());
    }

    #[tokio::test]
    async fn lost_ack_still_applies_once() {
        let server = server();
        let entry = OutboxEntry::new(
            EntityType::new("chat_message"),
            OperationKind::MessageSend,
            b"hello".to_vec(),
            "device-1",
            Timestamp(1),
        );
        server.faults().drop_dispatch_acks(1);

        let err = server
            .dispatch(&entry, &entry.idempotency_token)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(server.effect_count(), 1);

        let retried = server
            .dispatch(&entry, &entry.idempotency_token)
            .await
            .unwrap();
        assert_eq!(retried, DispatchOutcome::Delivered { duplicate: true });
        assert_eq!(server.effect_count(), 1);
        assert_eq!(server.stats().duplicate_dispatches, 1);
    }

    #[tokio::test]
    async fn dispatch_validator_rejects() {
        let server = server().with_dispatch_validator(|e| {
            if e.payload.len() > 4 {
                Err("attachment too large".into())
            } else {
                Ok(())
            }
        });
        let entry = OutboxEntry::new(
            EntityType::new("attachment"),
            OperationKind::FileUpload,
            vec![0; 16],
            "device-1",
            Timestamp(1),
        );

        let outcome = server
            .dispatch(&entry, &entry.idempotency_token)
            .await
            .unwrap();
        assert!(outcome.is_permanent_failure());
        assert_eq!(server.effect_count(), 0);
    }

    #[tokio::test]
    async fn remote_writes_are_visible_to_pulls() {
        let server = server();
        let written = server.put_remote(&task(), "t9", vec![7], true);
        assert!(written.is_deleted);

        let page = server.pull_page(&task(), None, 10).await.unwrap();
        assert_eq!(page.records, vec![written]);
    }
}
