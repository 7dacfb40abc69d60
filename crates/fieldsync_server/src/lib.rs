//! # FieldSync Server
//!
//! In-process reference remote store for FieldSync.
//!
//! This crate provides:
//! - A record table with strictly increasing server timestamps
//! - Cursor paging that never splits a run of equal timestamps
//! - An idempotency ledger so each outbox token takes effect once
//! - Payload validators that produce per-record rejections
//! - Fault injection (outages, 5xx, lost acknowledgements, latency)
//!
//! # Architecture
//!
//! [`RemoteServer`] implements the engine's `RemoteStore` trait directly, so
//! clients talk to it without a network hop. It is the counterpart used by
//! the CLI simulator and the end-to-end tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod faults;
mod ledger;
mod server;
mod table;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use faults::FaultPlan;
pub use ledger::{Effect, IdempotencyLedger};
pub use server::{RemoteServer, ServerStats};
pub use table::RecordTable;
