//! Direct transport: one WebRTC data channel per delivery.
//!
//! Negotiation is plain offer/answer with fully gathered ICE candidates,
//! relayed through discovery `signal` frames. The initiator opens a data
//! channel labelled `sta`, sends the envelope as a single text message, waits
//! for the send buffer to drain and closes the connection. Delivery is
//! confirmed only once the payload has been flushed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hsn_shared::constants::DATA_CHANNEL_LABEL;
use hsn_shared::protocol::SignalPayload;
use hsn_shared::types::DeliveryRoute;
use hsn_shared::{Fingerprint, Hrd, TransitEnvelope};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, Notify};
use tracing::{debug, info, warn};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::NetError;
use crate::transport::{IncomingSignal, Signaling, Transport};

/// How long a responder keeps an idle connection before closing it.
const RESPONDER_LINGER: Duration = Duration::from_secs(30);

const DRAIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct DirectConfig {
    pub stun_servers: Vec<String>,
    /// Upper bound on one delivery attempt, negotiation included.
    pub timeout: Duration,
    /// Answer inbound offers. When false every offer is rejected.
    pub accept_inbound: bool,
}

type SessionMap = Arc<Mutex<HashMap<String, oneshot::Sender<SignalPayload>>>>;

pub struct DirectTransport {
    api: Arc<API>,
    signaling: Arc<dyn Signaling>,
    config: DirectConfig,
    sessions: SessionMap,
}

impl DirectTransport {
    /// Build the transport and start answering signals. Envelopes received
    /// over inbound sessions are delivered on the returned channel.
    pub fn start(
        signaling: Arc<dyn Signaling>,
        config: DirectConfig,
    ) -> (Arc<Self>, mpsc::Receiver<TransitEnvelope>) {
        let api = Arc::new(APIBuilder::new().build());

        let transport = Arc::new(Self {
            api,
            signaling,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        });

        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let signals = transport.signaling.subscribe_signals();
        tokio::spawn(signal_loop(transport.clone(), signals, inbound_tx));

        (transport, inbound_rx)
    }

    fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = if self.config.stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.config.stun_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    /// Open a session to `target`, push one envelope, close.
    pub async fn deliver(&self, target: &Fingerprint, envelope: &TransitEnvelope) -> Result<(), NetError> {
        let text = serde_json::to_string(envelope)?;
        let session = uuid::Uuid::new_v4().to_string();
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config()).await?);

        let result = tokio::time::timeout(
            self.config.timeout,
            self.negotiate_and_send(&pc, target, &session, text),
        )
        .await;

        self.sessions.lock().await.remove(&session);
        if let Err(e) = pc.close().await {
            debug!(error = %e, "closing peer connection failed");
        }

        match result {
            Ok(inner) => inner,
            Err(_) => Err(NetError::Timeout("direct delivery")),
        }
    }

    async fn negotiate_and_send(
        &self,
        pc: &Arc<RTCPeerConnection>,
        target: &Fingerprint,
        session: &str,
        text: String,
    ) -> Result<(), NetError> {
        let channel = pc.create_data_channel(DATA_CHANNEL_LABEL, None).await?;
        let opened = Arc::new(Notify::new());
        let notify = opened.clone();
        channel.on_open(Box::new(move || {
            notify.notify_one();
            Box::pin(async {})
        }));

        let offer = pc.create_offer(None).await?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await?;
        let _ = gathered.recv().await;
        let local = pc
            .local_description()
            .await
            .ok_or_else(|| NetError::Negotiation("no local description".into()))?;

        let (answer_tx, answer_rx) = oneshot::channel();
        self.sessions.lock().await.insert(session.to_string(), answer_tx);
        self.signaling
            .send_signal(
                target,
                SignalPayload::Offer {
                    session: session.to_string(),
                    sdp: local.sdp,
                },
            )
            .await?;
        debug!(peer = %target.short(), session, "offer sent");

        let reply = answer_rx
            .await
            .map_err(|_| NetError::Negotiation("session dropped".into()))?;
        match reply {
            SignalPayload::Answer { sdp, .. } => {
                pc.set_remote_description(RTCSessionDescription::answer(sdp)?)
                    .await?;
            }
            SignalPayload::Reject { reason, .. } => return Err(NetError::DirectRejected(reason)),
            SignalPayload::Offer { .. } => {
                return Err(NetError::Negotiation("unexpected offer in reply".into()))
            }
        }

        opened.notified().await;
        channel.send_text(text).await?;
        while channel.buffered_amount().await > 0 {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        let _ = channel.close().await;

        info!(peer = %target.short(), session, "envelope flushed over direct link");
        Ok(())
    }

    async fn answer(
        &self,
        from: Fingerprint,
        session: String,
        sdp: String,
        inbound: mpsc::Sender<TransitEnvelope>,
    ) -> Result<(), NetError> {
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config()).await?);

        let done = Arc::new(Notify::new());
        let finished = done.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            if matches!(
                state,
                RTCPeerConnectionState::Closed
                    | RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Disconnected
            ) {
                finished.notify_one();
            }
            Box::pin(async {})
        }));

        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let inbound = inbound.clone();
            Box::pin(async move {
                channel.on_message(Box::new(move |msg: DataChannelMessage| {
                    let inbound = inbound.clone();
                    Box::pin(async move {
                        match serde_json::from_slice::<TransitEnvelope>(&msg.data) {
                            Ok(envelope) => {
                                let _ = inbound.send(envelope).await;
                            }
                            Err(e) => warn!(error = %e, "malformed envelope on direct link"),
                        }
                    })
                }));
            })
        }));

        pc.set_remote_description(RTCSessionDescription::offer(sdp)?)
            .await?;
        let answer = pc.create_answer(None).await?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(answer).await?;
        let _ = gathered.recv().await;
        let local = pc
            .local_description()
            .await
            .ok_or_else(|| NetError::Negotiation("no local description".into()))?;

        self.signaling
            .send_signal(
                &from,
                SignalPayload::Answer {
                    session: session.clone(),
                    sdp: local.sdp,
                },
            )
            .await?;
        debug!(peer = %from.short(), session = %session, "answer sent");

        let _ = tokio::time::timeout(RESPONDER_LINGER, done.notified()).await;
        let _ = pc.close().await;
        Ok(())
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn route(&self) -> DeliveryRoute {
        DeliveryRoute::Direct
    }

    async fn send(&self, envelope: &TransitEnvelope, hrd: Option<&Hrd>) -> Result<bool, NetError> {
        let Some(hrd) = hrd.filter(|h| h.supports_peer_link()) else {
            return Ok(false);
        };
        self.deliver(&hrd.identity, envelope).await?;
        Ok(true)
    }
}

async fn signal_loop(
    transport: Arc<DirectTransport>,
    mut signals: broadcast::Receiver<IncomingSignal>,
    inbound: mpsc::Sender<TransitEnvelope>,
) {
    loop {
        let signal = match signals.recv().await {
            Ok(signal) => signal,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "signal receiver lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        match signal.data {
            SignalPayload::Offer { session, sdp } => {
                if !transport.config.accept_inbound {
                    let reject = SignalPayload::Reject {
                        session,
                        reason: "direct links disabled".into(),
                    };
                    if let Err(e) = transport.signaling.send_signal(&signal.from, reject).await {
                        debug!(error = %e, "failed to send reject");
                    }
                    continue;
                }

                let transport = transport.clone();
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    let from = signal.from;
                    if let Err(e) = transport.answer(from.clone(), session, sdp, inbound).await {
                        warn!(peer = %from.short(), error = %e, "inbound direct session failed");
                    }
                });
            }
            reply @ (SignalPayload::Answer { .. } | SignalPayload::Reject { .. }) => {
                let waiter = transport.sessions.lock().await.remove(reply.session());
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => debug!(session = reply.session(), "reply for unknown session"),
                }
            }
        }
    }
}
