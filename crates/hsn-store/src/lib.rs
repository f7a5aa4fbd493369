//! # hsn-store
//!
//! Local persistence for an HSN node, backed by SQLite. Seven tables hold
//! the identity, the per-conversation state chains, the materialized
//! messages, proofs, the outbox, the inbox and the sync log. The chain engine
//! in [`ledger`] is the only writer of the chain, sync-log and message
//! tables; it writes them together in one transaction.

pub mod chain;
pub mod database;
pub mod identity;
pub mod inbox;
pub mod ledger;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod outbox;
pub mod proofs;
pub mod sync_log;

mod error;

pub use database::{Database, Store};
pub use error::{Result, StoreError};
pub use identity::initialize_identity;
pub use ledger::{Rejection, Verdict};
pub use models::*;
