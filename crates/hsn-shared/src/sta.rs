//! Signed state transitions (STA).
//!
//! An STA is immutable once created. Its signature covers the canonical form
//! of every other field; its `prev_state_hash` links it to the head of the
//! conversation chain it was built against.
//!
//! On the wire an STA is a flat JSON object:
//!
//! ```json
//! { "type": "chat.append", "from": "<fp>", "to": "<fp>", "payload": { "text": "hi" },
//!   "prev_state_hash": "<hex>", "timestamp": 1700000000, "nonce": "<uuid>",
//!   "signature": "<base64>" }
//! ```
//!
//! The `type`/`payload` pair is held as the [`Payload`] tagged union.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::canonical::canonicalize;
use crate::constants::CHAT_APPEND;
use crate::crypto::{encode_signature, hash_hex, verify_signature};
use crate::error::{HsnError, IdentityError};
use crate::identity::Identity;
use crate::types::{ChainId, Fingerprint};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Body of a `chat.append` transition. Fields other than `text` are kept
/// verbatim so the signed bytes survive a decode/encode cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAppend {
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed transition payload, keyed by the STA `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    ChatAppend(ChatAppend),
    /// A transition type this build does not interpret. It is still chained
    /// and signature-checked, just never projected.
    Opaque { kind: String, body: Value },
}

impl Payload {
    pub fn chat(text: impl Into<String>) -> Self {
        Payload::ChatAppend(ChatAppend {
            text: text.into(),
            extra: Map::new(),
        })
    }

    pub fn kind(&self) -> &str {
        match self {
            Payload::ChatAppend(_) => CHAT_APPEND,
            Payload::Opaque { kind, .. } => kind,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Payload::ChatAppend(chat) => {
                let mut map = chat.extra.clone();
                map.insert("text".to_string(), Value::String(chat.text.clone()));
                Value::Object(map)
            }
            Payload::Opaque { body, .. } => body.clone(),
        }
    }

    /// Rebuild a payload from its wire parts. A known type with a body that
    /// does not fit its schema is an error, not an opaque payload.
    pub fn from_parts(kind: String, body: Value) -> Result<Self, serde_json::Error> {
        match kind.as_str() {
            CHAT_APPEND => Ok(Payload::ChatAppend(serde_json::from_value(body)?)),
            _ => Ok(Payload::Opaque { kind, body }),
        }
    }
}

// ---------------------------------------------------------------------------
// STA
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StaRecord", into = "StaRecord")]
pub struct Sta {
    pub payload: Payload,
    pub from: Fingerprint,
    pub to: Fingerprint,
    pub prev_state_hash: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

/// Flat wire shape of an STA.
#[derive(Serialize, Deserialize)]
struct StaRecord {
    #[serde(rename = "type")]
    kind: String,
    from: Fingerprint,
    to: Fingerprint,
    payload: Value,
    prev_state_hash: String,
    timestamp: i64,
    nonce: String,
    signature: String,
}

impl TryFrom<StaRecord> for Sta {
    type Error = HsnError;

    fn try_from(record: StaRecord) -> Result<Self, Self::Error> {
        let kind = record.kind.clone();
        let payload = Payload::from_parts(record.kind, record.payload)
            .map_err(|e| HsnError::Protocol(format!("malformed {kind} payload: {e}")))?;
        Ok(Sta {
            payload,
            from: record.from,
            to: record.to,
            prev_state_hash: record.prev_state_hash,
            timestamp: record.timestamp,
            nonce: record.nonce,
            signature: record.signature,
        })
    }
}

impl From<Sta> for StaRecord {
    fn from(sta: Sta) -> Self {
        StaRecord {
            kind: sta.payload.kind().to_string(),
            payload: sta.payload.to_value(),
            from: sta.from,
            to: sta.to,
            prev_state_hash: sta.prev_state_hash,
            timestamp: sta.timestamp,
            nonce: sta.nonce,
            signature: sta.signature,
        }
    }
}

impl Sta {
    /// Build and sign a transition from `identity` to `to`. A fresh UUIDv4
    /// nonce is drawn for every call.
    pub fn new_signed(
        identity: &Identity,
        to: Fingerprint,
        payload: Payload,
        prev_state_hash: String,
        timestamp: i64,
    ) -> Self {
        let mut sta = Sta {
            payload,
            from: identity.fingerprint().clone(),
            to,
            prev_state_hash,
            timestamp,
            nonce: Uuid::new_v4().to_string(),
            signature: String::new(),
        };
        let signature = identity.sign(sta.signing_input().as_bytes());
        sta.signature = encode_signature(&signature);
        sta
    }

    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    pub fn chain_id(&self) -> ChainId {
        ChainId::between(&self.from, &self.to)
    }

    fn unsigned_value(&self) -> Value {
        json!({
            "type": self.payload.kind(),
            "from": self.from,
            "to": self.to,
            "payload": self.payload.to_value(),
            "prev_state_hash": self.prev_state_hash,
            "timestamp": self.timestamp,
            "nonce": self.nonce,
        })
    }

    /// Canonical form of every field except `signature`.
    pub fn signing_input(&self) -> String {
        canonicalize(&self.unsigned_value())
    }

    pub fn to_value(&self) -> Value {
        let mut value = self.unsigned_value();
        if let Value::Object(map) = &mut value {
            map.insert("signature".to_string(), Value::String(self.signature.clone()));
        }
        value
    }

    /// Canonical form of the complete record, the pre-image of its head hash.
    pub fn canonical(&self) -> String {
        canonicalize(&self.to_value())
    }

    /// Chain-head hash contributed by this transition once appended.
    pub fn head_hash(&self) -> String {
        hash_hex(&self.canonical())
    }

    pub fn verify(&self, key: &VerifyingKey) -> Result<(), IdentityError> {
        verify_signature(key, self.signing_input().as_bytes(), &self.signature)
    }
}
