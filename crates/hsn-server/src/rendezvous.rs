//! Rendezvous node: HRD registry plus signal relay over WebSocket.
//!
//! Every client connects to `/ws?hik=<fingerprint>`. Frames are JSON
//! [`DiscoveryRequest`]s in and [`DiscoveryEvent`]s out. An identity may hold
//! several sessions at once (one per device tab or process); signals are
//! fanned out to all of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use hsn_shared::protocol::{DiscoveryEvent, DiscoveryRequest, SignalPayload};
use hsn_shared::{Fingerprint, Hrd};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::ServerError;

struct Published {
    hrd: Hrd,
    expires_at: Instant,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<Fingerprint, HashMap<u64, mpsc::UnboundedSender<String>>>,
    hrds: HashMap<Fingerprint, Published>,
}

pub struct Rendezvous {
    registry: Mutex<Registry>,
    next_session: AtomicU64,
    hrd_ttl: Duration,
}

impl Rendezvous {
    pub fn new(hrd_ttl: Duration) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_session: AtomicU64::new(1),
            hrd_ttl,
        }
    }

    // ---- sessions ----

    /// Attach a session for `hik`. Frames pushed to the returned receiver
    /// must be written to that session's socket.
    pub async fn register(&self, hik: &Fingerprint) -> (u64, mpsc::UnboundedReceiver<String>) {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry
            .lock()
            .await
            .sessions
            .entry(hik.clone())
            .or_default()
            .insert(session, tx);
        debug!(hik = %hik.short(), session, "session registered");
        (session, rx)
    }

    pub async fn unregister(&self, hik: &Fingerprint, session: u64) {
        let mut registry = self.registry.lock().await;
        if let Some(sessions) = registry.sessions.get_mut(hik) {
            sessions.remove(&session);
            if sessions.is_empty() {
                registry.sessions.remove(hik);
            }
        }
        debug!(hik = %hik.short(), session, "session closed");
    }

    pub async fn is_online(&self, hik: &Fingerprint) -> bool {
        self.registry.lock().await.sessions.contains_key(hik)
    }

    // ---- HRD registry ----

    /// Store `hrd` as published by the session authenticated as `publisher`.
    pub async fn publish(&self, publisher: &Fingerprint, hrd: Hrd) -> Result<(), ServerError> {
        if &hrd.identity != publisher {
            return Err(ServerError::Forbidden(
                "HRD identity does not match session".into(),
            ));
        }
        if !hrd.is_self_consistent() {
            return Err(ServerError::BadRequest(
                "HRD identity is not derived from its keys".into(),
            ));
        }

        let expires_at = Instant::now() + self.hrd_ttl;
        self.registry
            .lock()
            .await
            .hrds
            .insert(publisher.clone(), Published { hrd, expires_at });
        info!(hik = %publisher.short(), "HRD published");
        Ok(())
    }

    /// Current descriptor for `target`. A descriptor whose owner has no live
    /// session is returned without its direct route.
    pub async fn query(&self, target: &Fingerprint) -> Option<Hrd> {
        self.query_at(Instant::now(), target).await
    }

    async fn query_at(&self, now: Instant, target: &Fingerprint) -> Option<Hrd> {
        let registry = self.registry.lock().await;
        let published = registry.hrds.get(target)?;
        if published.expires_at <= now {
            return None;
        }
        if registry.sessions.contains_key(target) {
            Some(published.hrd.clone())
        } else {
            Some(published.hrd.without_direct())
        }
    }

    pub async fn purge_expired(&self) -> usize {
        self.purge_at(Instant::now()).await
    }

    async fn purge_at(&self, now: Instant) -> usize {
        let mut registry = self.registry.lock().await;
        let before = registry.hrds.len();
        registry.hrds.retain(|_, published| published.expires_at > now);
        before - registry.hrds.len()
    }

    // ---- signalling ----

    /// Deliver `data` from `from` to every session of `target`. Returns how
    /// many sessions received it.
    pub async fn forward_signal(
        &self,
        from: &Fingerprint,
        target: &Fingerprint,
        data: SignalPayload,
    ) -> usize {
        let event = DiscoveryEvent::Signal {
            from: from.clone(),
            data,
        };
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode signal");
                return 0;
            }
        };

        let registry = self.registry.lock().await;
        let Some(sessions) = registry.sessions.get(target) else {
            debug!(from = %from.short(), target = %target.short(), "signal target offline");
            return 0;
        };
        sessions
            .values()
            .filter(|tx| tx.send(frame.clone()).is_ok())
            .count()
    }

    /// Process one inbound frame from `hik`. Returns the event to send back
    /// on the same session, if any.
    pub async fn handle_frame(&self, hik: &Fingerprint, text: &str) -> Option<DiscoveryEvent> {
        let request: DiscoveryRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => {
                debug!(hik = %hik.short(), error = %e, "ignoring malformed frame");
                return None;
            }
        };

        match request {
            DiscoveryRequest::PublishHrd { data } => {
                if let Err(e) = self.publish(hik, data).await {
                    warn!(hik = %hik.short(), error = %e, "HRD publish refused");
                }
                None
            }
            DiscoveryRequest::QueryHrd { target, id } => {
                let data = self.query(&target).await;
                Some(DiscoveryEvent::HrdResponse { id, data })
            }
            DiscoveryRequest::Signal { target, data } => {
                self.forward_signal(hik, &target, data).await;
                None
            }
        }
    }

    /// Drive one WebSocket session until either side closes it.
    pub async fn run_session(self: Arc<Self>, hik: Fingerprint, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let (session, mut outgoing) = self.register(&hik).await;

        loop {
            tokio::select! {
                frame = outgoing.recv() => {
                    let Some(frame) = frame else { break };
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let Some(reply) = self.handle_frame(&hik, &text).await else {
                                continue;
                            };
                            match serde_json::to_string(&reply) {
                                Ok(frame) => {
                                    if sink.send(Message::Text(frame)).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!(error = %e, "failed to encode reply"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(hik = %hik.short(), error = %e, "session read failed");
                            break;
                        }
                    }
                }
            }
        }

        self.unregister(&hik, session).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsn_shared::protocol::{DirectReach, FallbackReach, Reachability};
    use hsn_shared::Identity;

    fn full_hrd(identity: &Identity) -> Hrd {
        Hrd::for_identity(
            identity,
            Reachability {
                direct: Some(DirectReach {
                    supports_peer_link: true,
                }),
                fallback: Some(FallbackReach {
                    gateway_url: "http://gw".into(),
                    ttl_seconds: 300,
                }),
            },
        )
    }

    #[tokio::test]
    async fn test_publish_and_query() {
        let node = Rendezvous::new(Duration::from_secs(60));
        let alice = Identity::generate();
        let hik = alice.fingerprint().clone();
        let (session, _rx) = node.register(&hik).await;

        node.publish(&hik, full_hrd(&alice)).await.unwrap();
        let hrd = node.query(&hik).await.unwrap();
        assert!(hrd.supports_peer_link());

        // Once offline, the direct route is withheld but fallback remains.
        node.unregister(&hik, session).await;
        let hrd = node.query(&hik).await.unwrap();
        assert!(!hrd.supports_peer_link());
        assert!(hrd.reachability.fallback.is_some());

        assert!(node.query(&Fingerprint::new("nobody")).await.is_none());
    }

    #[tokio::test]
    async fn test_publish_checks_identity() {
        let node = Rendezvous::new(Duration::from_secs(60));
        let alice = Identity::generate();
        let mallory = Identity::generate();

        assert!(matches!(
            node.publish(mallory.fingerprint(), full_hrd(&alice)).await,
            Err(ServerError::Forbidden(_))
        ));

        let mut forged = full_hrd(&alice);
        forged.sign_public_key = mallory.sign_jwk();
        assert!(matches!(
            node.publish(alice.fingerprint(), forged).await,
            Err(ServerError::BadRequest(_))
        ));
        assert!(node.query(alice.fingerprint()).await.is_none());
    }

    #[tokio::test]
    async fn test_hrd_expiry() {
        let node = Rendezvous::new(Duration::from_secs(10));
        let alice = Identity::generate();
        let hik = alice.fingerprint().clone();
        node.publish(&hik, full_hrd(&alice)).await.unwrap();

        let later = Instant::now() + Duration::from_secs(20);
        assert!(node.query_at(later, &hik).await.is_none());
        assert_eq!(node.purge_at(later).await, 1);
    }

    #[tokio::test]
    async fn test_signal_fans_out_to_sessions() {
        let node = Rendezvous::new(Duration::from_secs(60));
        let alice = Fingerprint::new("alice");
        let bob = Fingerprint::new("bob");
        let (_, mut first) = node.register(&bob).await;
        let (_, mut second) = node.register(&bob).await;

        let data = SignalPayload::Offer {
            session: "s1".into(),
            sdp: "v=0".into(),
        };
        assert_eq!(node.forward_signal(&alice, &bob, data.clone()).await, 2);

        for rx in [&mut first, &mut second] {
            let frame = rx.recv().await.unwrap();
            let event: DiscoveryEvent = serde_json::from_str(&frame).unwrap();
            assert_eq!(
                event,
                DiscoveryEvent::Signal {
                    from: alice.clone(),
                    data: data.clone()
                }
            );
        }

        assert_eq!(node.forward_signal(&bob, &alice, data).await, 0);
    }

    #[tokio::test]
    async fn test_handle_frame() {
        let node = Rendezvous::new(Duration::from_secs(60));
        let alice = Identity::generate();
        let hik = alice.fingerprint().clone();

        let publish = serde_json::to_string(&DiscoveryRequest::PublishHrd {
            data: full_hrd(&alice),
        })
        .unwrap();
        assert!(node.handle_frame(&hik, &publish).await.is_none());

        let query = serde_json::to_string(&DiscoveryRequest::QueryHrd {
            target: hik.clone(),
            id: "q1".into(),
        })
        .unwrap();
        match node.handle_frame(&hik, &query).await {
            Some(DiscoveryEvent::HrdResponse { id, data }) => {
                assert_eq!(id, "q1");
                assert_eq!(data.unwrap().identity, hik);
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        assert!(node.handle_frame(&hik, "not json").await.is_none());
    }
}
