//! # FieldSync Engine
//!
//! Offline-first sync for FieldSync clients.
//!
//! This crate provides:
//! - Local store traits for records, cursors and the outbox log
//! - An in-memory store with atomic snapshot files
//! - Push coordinator with compare-and-clear of the dirty flag
//! - Pull coordinator with cursor-based paging and last-write-wins merge
//! - Outbox drain with exponential backoff and idempotency tokens
//! - Orchestrator with per-type single-flight cycles and a status stream
//!
//! ## Architecture
//!
//! Every cycle is **push-then-pull** for one entity type:
//! 1. Snapshot dirty records and push them in batches
//! 2. Clear `dirty` only where `updated_at` is unchanged since the snapshot,
//!    adopting the stamp the remote acked
//! 3. Pull pages after the cursor and merge them through the resolver
//! 4. Advance the cursor to the largest `updated_at` merged
//!
//! The outbox is drained independently of record sync.
//!
//! ## Key Invariants
//!
//! - A local write is never lost to a push or a pull
//! - A dirty record is never overwritten by a pull
//! - Cursors never move backwards
//! - An outbox entry has a single remote effect however often it is retried

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod clock;
mod config;
mod drain;
mod error;
mod memory;
mod orchestrator;
mod pull;
mod push;
mod remote;
mod report;
mod status;
mod store;
mod typed;

pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OutboxConfig, RetryConfig, SyncConfig, MAX_PUSH_BATCH_SIZE};
pub use drain::OutboxDrainer;
pub use error::{StoreError, StoreResult, SyncError, SyncResult};
pub use memory::MemoryStore;
pub use orchestrator::{SyncHandle, SyncOrchestrator, SyncStats};
pub use pull::PullCoordinator;
pub use push::PushCoordinator;
pub use remote::{MockFailure, MockRemote, RemoteStore};
pub use report::{
    CycleOutcome, DrainReport, EntityReport, EntryFailure, MergeCounts, PullReport, PushReport,
    RecordRejection, SyncReport,
};
pub use status::{CycleState, SyncStatus};
pub use store::{CursorStore, LocalStore, MergeOutcome, OutboxLog, RecordStore, Resolver};
pub use typed::TypedRecords;

pub use fieldsync_protocol as protocol;
