//! Row types returned by the table helpers.

use hsn_shared::{ChainId, Fingerprint, Sta};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// State chain
// ---------------------------------------------------------------------------

/// One appended transition and its position in the local log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEntry {
    pub seq: i64,
    pub chain_id: ChainId,
    pub sta: Sta,
    /// Canonical JSON of `sta`, exactly as hashed.
    pub record: String,
}

// ---------------------------------------------------------------------------
// Materialized message
// ---------------------------------------------------------------------------

/// Projection of a `chat.append` transition. Derived data; the chain row is
/// authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub seq: i64,
    pub chain_id: ChainId,
    pub nonce: String,
    pub from: Fingerprint,
    pub to: Fingerprint,
    pub timestamp: i64,
    pub text: String,
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// An STA waiting for confirmed delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub nonce: String,
    pub to: Fingerprint,
    pub sta: Sta,
    pub created_at: i64,
    pub attempts: u32,
    pub last_attempt_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

/// A raw envelope as received, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxEntry {
    pub seq: i64,
    pub envelope_id: Option<String>,
    pub source: String,
    pub record: String,
    pub received_at: i64,
}

// ---------------------------------------------------------------------------
// Proofs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ProofRecord {
    pub seq: i64,
    pub nonce: Option<String>,
    pub blob: Vec<u8>,
    pub created_at: i64,
}
