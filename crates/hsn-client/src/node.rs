//! Node wiring: store, identity, transports and the background loops that
//! keep a long-running client in sync.

use std::sync::Arc;
use std::time::Duration;

use hsn_net::{
    DirectConfig, DirectTransport, Discovery, DiscoveryClient, DiscoveryConfig, FallbackTransport,
    PollReport, Signaling, Transport,
};
use hsn_shared::protocol::{DirectReach, FallbackReach, Reachability};
use hsn_shared::{Fingerprint, Hrd, Identity, TransitEnvelope};
use hsn_store::{initialize_identity, Database, Store};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::delivery::DeliveryOrchestrator;
use crate::error::Result;

pub struct Node {
    config: ClientConfig,
    identity: Identity,
    orchestrator: Arc<DeliveryOrchestrator>,
    discovery: Option<DiscoveryClient>,
    fallback: Arc<FallbackTransport>,
    inbound: Option<mpsc::Receiver<TransitEnvelope>>,
}

impl Node {
    /// Open the configured database and build the node. Must be called from
    /// inside a tokio runtime when signal nodes are configured.
    pub fn open(config: ClientConfig) -> Result<Self> {
        let store = match &config.db_path {
            Some(path) => Store::open_at(path)?,
            None => Store::new(Database::new()?),
        };
        Self::with_store(config, store)
    }

    pub fn with_store(config: ClientConfig, store: Store) -> Result<Self> {
        let identity = initialize_identity(&store)?;
        let fallback = Arc::new(FallbackTransport::new(
            config.transit_base.clone(),
            config.transit_ttl_secs,
        )?);

        let mut transports: Vec<Arc<dyn Transport>> = Vec::new();
        let mut inbound = None;
        let discovery = if config.discovery_enabled() {
            let client = DiscoveryClient::spawn(DiscoveryConfig {
                nodes: config.signal_nodes.clone(),
                hik: identity.fingerprint().clone(),
                query_timeout: config.discovery_timeout,
            });
            let signaling: Arc<dyn Signaling> = Arc::new(client.clone());
            let (direct, received) = DirectTransport::start(
                signaling,
                DirectConfig {
                    stun_servers: config.stun_servers.clone(),
                    timeout: config.direct_timeout,
                    accept_inbound: config.advertise_direct,
                },
            );
            transports.push(direct);
            inbound = Some(received);
            Some(client)
        } else {
            None
        };
        transports.push(fallback.clone());

        let discovery_seam = discovery
            .clone()
            .map(|client| Arc::new(client) as Arc<dyn Discovery>);
        let orchestrator = Arc::new(DeliveryOrchestrator::new(
            store,
            identity.clone(),
            transports,
            discovery_seam,
        ));

        info!(
            fingerprint = %identity.fingerprint(),
            discovery = discovery.is_some(),
            fallback = config.transit_base.is_some(),
            "node ready"
        );

        Ok(Self {
            config,
            identity,
            orchestrator,
            discovery,
            fallback,
            inbound,
        })
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        self.identity.fingerprint()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn orchestrator(&self) -> &Arc<DeliveryOrchestrator> {
        &self.orchestrator
    }

    pub fn discovery(&self) -> Option<&DiscoveryClient> {
        self.discovery.as_ref()
    }

    /// Our current reachability descriptor.
    pub fn hrd(&self) -> Hrd {
        let direct = (self.discovery.is_some() && self.config.advertise_direct).then_some(DirectReach {
            supports_peer_link: true,
        });
        let fallback = self.config.transit_base.as_ref().map(|gateway| FallbackReach {
            gateway_url: gateway.clone(),
            ttl_seconds: self.config.transit_ttl_secs,
        });
        Hrd::for_identity(&self.identity, Reachability { direct, fallback })
    }

    /// Publish [`hrd`](Self::hrd) to every rendezvous node. No-op without
    /// discovery.
    pub async fn publish_reachability(&self) {
        if let Some(discovery) = &self.discovery {
            discovery.publish(self.hrd()).await;
            debug!("reachability published");
        }
    }

    /// One fallback polling pass. Envelopes are appended through the
    /// orchestrator.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let orchestrator = self.orchestrator.as_ref();
        Ok(self
            .fallback
            .poll_transit(orchestrator.store(), self.identity.fingerprint(), orchestrator)
            .await?)
    }

    /// Start the background loops: inbound direct envelopes, periodic
    /// fallback polling and periodic outbox retries.
    pub fn spawn_loops(&mut self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(mut inbound) = self.inbound.take() {
            let orchestrator = self.orchestrator.clone();
            handles.push(tokio::spawn(async move {
                while let Some(envelope) = inbound.recv().await {
                    let appended = orchestrator.accept_inbound(&envelope).await;
                    debug!(nonce = %envelope.sta.nonce, appended, "direct envelope handled");
                }
            }));
        }

        if self.config.transit_base.is_some() {
            let fallback = self.fallback.clone();
            let orchestrator = self.orchestrator.clone();
            let hik = self.identity.fingerprint().clone();
            let period = self.config.poll_interval;
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(non_zero(period));
                loop {
                    interval.tick().await;
                    let polled = fallback
                        .poll_transit(orchestrator.store(), &hik, orchestrator.as_ref())
                        .await;
                    if let Err(e) = polled {
                        warn!(error = %e, "transit poll failed");
                    }
                }
            }));
        }

        let orchestrator = self.orchestrator.clone();
        let period = self.config.retry_interval;
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(non_zero(period));
            // Skip the immediate first tick.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = orchestrator.retry_pending().await {
                    warn!(error = %e, "outbox retry failed");
                }
            }
        }));

        info!(tasks = handles.len(), "background loops started");
        handles
    }
}

fn non_zero(period: Duration) -> Duration {
    period.max(Duration::from_secs(1))
}
