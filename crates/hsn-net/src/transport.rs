//! Seams between the delivery pipeline and concrete transports.

use async_trait::async_trait;
use hsn_shared::protocol::SignalPayload;
use hsn_shared::types::DeliveryRoute;
use hsn_shared::{Fingerprint, Hrd, TransitEnvelope};
use tokio::sync::broadcast;

use crate::error::NetError;

/// One way of handing an envelope to its recipient.
///
/// `Ok(true)` means delivery was confirmed (payload flushed to the peer or
/// accepted by a gateway). `Ok(false)` means the transport does not apply to
/// this recipient; `Err` is a failed attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    fn route(&self) -> DeliveryRoute;

    async fn send(&self, envelope: &TransitEnvelope, hrd: Option<&Hrd>) -> Result<bool, NetError>;
}

/// Receiving side of the engine. Envelopes from every transport go through
/// one implementation so appends to a chain stay serialized.
#[async_trait]
pub trait Inbound: Send + Sync {
    /// `true` when the envelope was validated and appended.
    async fn accept(&self, envelope: &TransitEnvelope) -> bool;
}

/// Reachability lookup and publication.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Resolves to `None` when no node knows the target or the query times out.
    async fn query_reachability(&self, target: &Fingerprint) -> Option<Hrd>;

    /// Fire-and-forget.
    async fn publish_reachability(&self, hrd: Hrd);
}

/// A signal forwarded by a rendezvous node.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingSignal {
    pub from: Fingerprint,
    pub data: SignalPayload,
}

/// Relay for direct-session negotiation frames.
#[async_trait]
pub trait Signaling: Send + Sync {
    async fn send_signal(&self, target: &Fingerprint, data: SignalPayload) -> Result<(), NetError>;

    fn subscribe_signals(&self) -> broadcast::Receiver<IncomingSignal>;
}
