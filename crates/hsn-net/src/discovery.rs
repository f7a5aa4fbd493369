//! Discovery client: persistent WebSocket links to rendezvous nodes.
//!
//! Each configured node gets its own connection task that reconnects with
//! exponential backoff and re-publishes the last HRD whenever it comes back.
//! Queries are broadcast to every connected node; the first non-null answer
//! wins, and `None` resolves once every asked node said null or the timeout
//! fires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use hsn_shared::constants::HIK_PARAM;
use hsn_shared::protocol::{DiscoveryEvent, DiscoveryRequest, SignalPayload};
use hsn_shared::{Fingerprint, Hrd};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::NetError;
use crate::transport::{Discovery, IncomingSignal, Signaling};

/// Base delay between reconnection attempts.
const RECONNECT_BASE_DELAY_MS: u64 = 500;

/// Maximum delay between reconnection attempts.
const MAX_RECONNECT_DELAY_SECS: u64 = 30;

const SIGNAL_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Rendezvous WebSocket endpoints, e.g. `ws://host:8080/ws`.
    pub nodes: Vec<String>,
    /// Local fingerprint, sent as `?hik=` so nodes can route signals to us.
    pub hik: Fingerprint,
    pub query_timeout: Duration,
}

struct PendingQuery {
    remaining: usize,
    reply: oneshot::Sender<Option<Hrd>>,
}

#[derive(Default)]
struct Shared {
    last_hrd: Option<Hrd>,
    links: HashMap<usize, mpsc::UnboundedSender<String>>,
    pending: HashMap<String, PendingQuery>,
}

/// Handle to the background connection tasks. Cheap to clone.
#[derive(Clone)]
pub struct DiscoveryClient {
    shared: Arc<Mutex<Shared>>,
    signals: broadcast::Sender<IncomingSignal>,
    query_timeout: Duration,
}

impl DiscoveryClient {
    /// Start one connection task per configured node.
    pub fn spawn(config: DiscoveryConfig) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_BUFFER);
        let client = Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            signals,
            query_timeout: config.query_timeout,
        };

        for (index, node) in config.nodes.iter().enumerate() {
            let url = node_url(node, &config.hik);
            tokio::spawn(connection_loop(
                index,
                url,
                client.shared.clone(),
                client.signals.clone(),
            ));
        }

        info!(nodes = config.nodes.len(), "discovery client started");
        client
    }

    /// Number of nodes with a live connection.
    pub async fn connected_nodes(&self) -> usize {
        self.shared.lock().await.links.len()
    }

    /// Wait until at least one node is connected, up to `limit`.
    pub async fn wait_connected(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.connected_nodes().await > 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.connected_nodes().await > 0
    }

    pub async fn query(&self, target: &Fingerprint) -> Option<Hrd> {
        let id = uuid::Uuid::new_v4().to_string();
        let frame = match encode(&DiscoveryRequest::QueryHrd {
            target: target.clone(),
            id: id.clone(),
        }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode query");
                return None;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut shared = self.shared.lock().await;
            if shared.links.is_empty() {
                debug!(target = %target.short(), "no rendezvous node connected");
                return None;
            }

            let mut asked = 0;
            for link in shared.links.values() {
                if link.send(frame.clone()).is_ok() {
                    asked += 1;
                }
            }
            if asked == 0 {
                return None;
            }
            shared.pending.insert(
                id.clone(),
                PendingQuery {
                    remaining: asked,
                    reply: reply_tx,
                },
            );
        }

        match tokio::time::timeout(self.query_timeout, reply_rx).await {
            Ok(Ok(hrd)) => hrd,
            Ok(Err(_)) => None,
            Err(_) => {
                self.shared.lock().await.pending.remove(&id);
                debug!(target = %target.short(), "reachability query timed out");
                None
            }
        }
    }

    pub async fn publish(&self, hrd: Hrd) {
        let frame = match encode(&DiscoveryRequest::PublishHrd { data: hrd.clone() }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to encode HRD");
                return;
            }
        };

        let mut shared = self.shared.lock().await;
        shared.last_hrd = Some(hrd);
        for link in shared.links.values() {
            let _ = link.send(frame.clone());
        }
    }

    pub async fn signal(&self, target: &Fingerprint, data: SignalPayload) -> Result<(), NetError> {
        let frame = encode(&DiscoveryRequest::Signal {
            target: target.clone(),
            data,
        })?;

        let shared = self.shared.lock().await;
        let mut sent = false;
        for link in shared.links.values() {
            sent |= link.send(frame.clone()).is_ok();
        }
        if sent {
            Ok(())
        } else {
            Err(NetError::DiscoveryUnavailable)
        }
    }
}

#[async_trait]
impl Discovery for DiscoveryClient {
    async fn query_reachability(&self, target: &Fingerprint) -> Option<Hrd> {
        self.query(target).await
    }

    async fn publish_reachability(&self, hrd: Hrd) {
        self.publish(hrd).await
    }
}

#[async_trait]
impl Signaling for DiscoveryClient {
    async fn send_signal(&self, target: &Fingerprint, data: SignalPayload) -> Result<(), NetError> {
        self.signal(target, data).await
    }

    fn subscribe_signals(&self) -> broadcast::Receiver<IncomingSignal> {
        self.signals.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Connection tasks
// ---------------------------------------------------------------------------

async fn connection_loop(
    index: usize,
    url: String,
    shared: Arc<Mutex<Shared>>,
    signals: broadcast::Sender<IncomingSignal>,
) {
    let mut attempts = 0u32;

    loop {
        match run_connection(index, &url, &shared, &signals).await {
            Ok(()) => {
                debug!(node = %url, "rendezvous connection closed");
                attempts = 0;
            }
            Err(e) => {
                warn!(node = %url, error = %e, "rendezvous connection failed");
                attempts = attempts.saturating_add(1);
            }
        }

        forget_link(index, &shared).await;
        tokio::time::sleep(backoff(attempts)).await;
    }
}

async fn run_connection(
    index: usize,
    url: &str,
    shared: &Arc<Mutex<Shared>>,
    signals: &broadcast::Sender<IncomingSignal>,
) -> Result<(), NetError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    {
        let mut guard = shared.lock().await;
        if let Some(hrd) = &guard.last_hrd {
            let _ = out_tx.send(encode(&DiscoveryRequest::PublishHrd { data: hrd.clone() })?);
        }
        guard.links.insert(index, out_tx);
    }
    info!(node = %url, "connected to rendezvous node");

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                let Some(frame) = outgoing else { return Ok(()) };
                sink.send(Message::Text(frame.into())).await?;
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_event(text.as_str(), shared, signals).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}

async fn handle_event(text: &str, shared: &Mutex<Shared>, signals: &broadcast::Sender<IncomingSignal>) {
    let event: DiscoveryEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "ignoring malformed discovery frame");
            return;
        }
    };

    match event {
        DiscoveryEvent::HrdResponse { id, data } => {
            let mut guard = shared.lock().await;
            let Some(pending) = guard.pending.get_mut(&id) else {
                return;
            };
            match data {
                Some(hrd) => {
                    if let Some(done) = guard.pending.remove(&id) {
                        let _ = done.reply.send(Some(hrd));
                    }
                }
                None => {
                    pending.remaining = pending.remaining.saturating_sub(1);
                    if pending.remaining == 0 {
                        if let Some(done) = guard.pending.remove(&id) {
                            let _ = done.reply.send(None);
                        }
                    }
                }
            }
        }
        DiscoveryEvent::Signal { from, data } => {
            debug!(from = %from.short(), session = data.session(), "signal received");
            let _ = signals.send(IncomingSignal { from, data });
        }
    }
}

async fn forget_link(index: usize, shared: &Mutex<Shared>) {
    shared.lock().await.links.remove(&index);
}

fn encode(request: &DiscoveryRequest) -> Result<String, NetError> {
    Ok(serde_json::to_string(request)?)
}

fn node_url(node: &str, hik: &Fingerprint) -> String {
    let separator = if node.contains('?') { '&' } else { '?' };
    format!("{node}{separator}{HIK_PARAM}={hik}")
}

fn backoff(attempts: u32) -> Duration {
    let exp = attempts.min(10);
    let delay = RECONNECT_BASE_DELAY_MS.saturating_mul(1u64 << exp);
    Duration::from_millis(delay.min(MAX_RECONNECT_DELAY_SECS * 1000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_url() {
        let fp = Fingerprint::new("abc");
        assert_eq!(node_url("ws://h/ws", &fp), "ws://h/ws?hik=abc");
        assert_eq!(node_url("ws://h/ws?x=1", &fp), "ws://h/ws?x=1&hik=abc");
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff(0), Duration::from_millis(500));
        assert_eq!(backoff(1), Duration::from_millis(1000));
        assert_eq!(backoff(50), Duration::from_secs(MAX_RECONNECT_DELAY_SECS));
    }

    #[tokio::test]
    async fn test_query_without_nodes_is_none() {
        let client = DiscoveryClient::spawn(DiscoveryConfig {
            nodes: vec![],
            hik: Fingerprint::new("me"),
            query_timeout: Duration::from_millis(50),
        });
        assert!(client.query(&Fingerprint::new("bob")).await.is_none());
        assert!(matches!(
            client
                .signal(
                    &Fingerprint::new("bob"),
                    SignalPayload::Reject {
                        session: "s".into(),
                        reason: "x".into()
                    }
                )
                .await,
            Err(NetError::DiscoveryUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_null_answers_resolve_after_all_nodes() {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (signals, _) = broadcast::channel(4);
        let (reply, rx) = oneshot::channel();
        shared.lock().await.pending.insert(
            "q".into(),
            PendingQuery {
                remaining: 2,
                reply,
            },
        );

        let null = r#"{"type":"hrd_response","id":"q","data":null}"#;
        handle_event(null, &shared, &signals).await;
        assert!(shared.lock().await.pending.contains_key("q"));
        handle_event(null, &shared, &signals).await;
        assert!(!shared.lock().await.pending.contains_key("q"));
        assert_eq!(rx.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_first_hit_wins_and_late_answers_dropped() {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (signals, _) = broadcast::channel(4);
        let (reply, rx) = oneshot::channel();
        shared.lock().await.pending.insert(
            "q".into(),
            PendingQuery {
                remaining: 3,
                reply,
            },
        );

        let id = hsn_shared::Identity::generate();
        let hrd = Hrd::for_identity(&id, Default::default());
        let hit = serde_json::to_string(&DiscoveryEvent::HrdResponse {
            id: "q".into(),
            data: Some(hrd.clone()),
        })
        .unwrap();

        handle_event(&hit, &shared, &signals).await;
        handle_event(r#"{"type":"hrd_response","id":"q","data":null}"#, &shared, &signals).await;
        assert_eq!(rx.await.unwrap(), Some(hrd));
        assert!(shared.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn test_signal_frames_broadcast() {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (signals, mut rx) = broadcast::channel(4);
        let frame = r#"{"type":"signal","from":"alice","data":{"kind":"offer","session":"s1","sdp":"v=0"}}"#;
        handle_event(frame, &shared, &signals).await;

        let got = rx.recv().await.unwrap();
        assert_eq!(got.from, Fingerprint::new("alice"));
        assert_eq!(got.data.session(), "s1");
    }
}
