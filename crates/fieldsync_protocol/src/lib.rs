//! # FieldSync Protocol
//!
//! Data model and pure policy for the FieldSync offline-first engine.
//!
//! This crate provides:
//! - `SyncableRecord` with its dirty / `updated_at` / `synced_at` metadata
//! - The `Syncable` trait implemented once per entity type
//! - `OutboxEntry` and its status lifecycle
//! - `SyncCursor` watermarks for incremental pulls
//! - Remote adapter messages (`PushAck`, `PullPage`, `DispatchOutcome`)
//! - The last-write-wins conflict resolver
//! - CBOR payload encoding
//!
//! This is a pure crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod conflict;
mod cursor;
mod error;
mod messages;
mod outbox;
mod record;
mod types;

pub use codec::{decode, encode};
pub use conflict::{resolve, resolve_record, ConflictResolution, Decision, ResolutionReason};
pub use cursor::SyncCursor;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{DispatchOutcome, PullPage, PushAck};
pub use outbox::{IdempotencyToken, OperationKind, OutboxEntry, OutboxStatus};
pub use record::{DirtyRef, Syncable, SyncableRecord};
pub use types::{EntityType, Timestamp};
