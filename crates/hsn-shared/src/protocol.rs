use serde::{Deserialize, Serialize};

use crate::identity::{derive_fingerprint, Identity, PublicJwk};
use crate::sta::Sta;
use crate::types::Fingerprint;

// ---- Reachability descriptor ----

/// HSN Reachability Descriptor: how to reach an identity right now.
/// Ephemeral, published to rendezvous nodes and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hrd {
    pub identity: Fingerprint,
    pub sign_public_key: PublicJwk,
    pub agreement_public_key: PublicJwk,
    pub reachability: Reachability,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reachability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct: Option<DirectReach>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReach>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectReach {
    pub supports_peer_link: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackReach {
    pub gateway_url: String,
    pub ttl_seconds: u64,
}

impl Hrd {
    pub fn for_identity(identity: &Identity, reachability: Reachability) -> Self {
        Self {
            identity: identity.fingerprint().clone(),
            sign_public_key: identity.sign_jwk(),
            agreement_public_key: identity.agreement_jwk(),
            reachability,
        }
    }

    pub fn supports_peer_link(&self) -> bool {
        self.reachability
            .direct
            .as_ref()
            .is_some_and(|d| d.supports_peer_link)
    }

    /// True when `identity` is the fingerprint of the enclosed keys.
    pub fn is_self_consistent(&self) -> bool {
        derive_fingerprint(&self.sign_public_key, &self.agreement_public_key) == self.identity
    }

    /// Copy of the descriptor with the direct route removed.
    pub fn without_direct(&self) -> Self {
        let mut hrd = self.clone();
        hrd.reachability.direct = None;
        hrd
    }
}

// ---- Envelopes ----

/// What travels over either transport: the STA plus the key that signed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitEnvelope {
    pub sta: Sta,
    pub sender_sign_public_jwk: PublicJwk,
}

/// Envelope as held by a transit gateway, with the id used to delete it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEnvelope {
    pub id: String,
    pub sta: Sta,
    pub sender_sign_public_jwk: PublicJwk,
}

impl TransitEnvelope {
    pub fn new(sta: Sta, sender_sign_public_jwk: PublicJwk) -> Self {
        Self {
            sta,
            sender_sign_public_jwk,
        }
    }
}

impl StoredEnvelope {
    pub fn into_transit(self) -> (String, TransitEnvelope) {
        (self.id, TransitEnvelope::new(self.sta, self.sender_sign_public_jwk))
    }
}

// ---- Discovery wire protocol ----

/// Client to rendezvous node frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryRequest {
    PublishHrd {
        data: Hrd,
    },
    QueryHrd {
        target: Fingerprint,
        id: String,
    },
    Signal {
        target: Fingerprint,
        data: SignalPayload,
    },
}

/// Rendezvous node to client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    HrdResponse {
        id: String,
        data: Option<Hrd>,
    },
    Signal {
        from: Fingerprint,
        data: SignalPayload,
    },
}

/// Direct-link session negotiation carried inside `signal` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer { session: String, sdp: String },
    Answer { session: String, sdp: String },
    Reject { session: String, reason: String },
}

impl SignalPayload {
    pub fn session(&self) -> &str {
        match self {
            SignalPayload::Offer { session, .. }
            | SignalPayload::Answer { session, .. }
            | SignalPayload::Reject { session, .. } => session,
        }
    }
}
