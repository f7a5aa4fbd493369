//! Delivery orchestrator.
//!
//! `submit` builds and signs a transition, appends it to the local chain and
//! queues it in the outbox in one transaction, then tries each transport in
//! order until one confirms delivery. Nothing on this path returns an error to the caller:
//! failures are logged and the outbox entry stays behind for
//! [`DeliveryOrchestrator::retry_pending`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hsn_net::{Discovery, Inbound, Transport};
use hsn_shared::canonical::canonicalize;
use hsn_shared::types::{now_secs, DeliveryRoute};
use hsn_shared::{ChainId, Fingerprint, Hrd, Identity, Payload, Sta, TransitEnvelope};
use hsn_store::{ledger, Store, StoreError, StoredMessage};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Own transition rejected by local chain: {0}")]
    Rejected(String),

    #[error("No transport configured")]
    NoTransport,

    #[error("Undelivered: {0}")]
    Undelivered(String),
}

/// Where a submitted transition ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Confirmed by a transport; the outbox entry is gone.
    Delivered(DeliveryRoute),
    /// Addressed to ourselves; the local append is the delivery.
    Local,
    /// Still in the outbox.
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub nonce: String,
    pub chain: ChainId,
    pub status: DeliveryStatus,
}

/// Outcome of one pass over the outbox.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub delivered: usize,
}

pub struct DeliveryOrchestrator {
    store: Store,
    identity: Identity,
    transports: Vec<Arc<dyn Transport>>,
    discovery: Option<Arc<dyn Discovery>>,
    chain_locks: Mutex<HashMap<ChainId, Arc<Mutex<()>>>>,
}

impl DeliveryOrchestrator {
    /// `transports` are tried in the given order (direct before fallback).
    pub fn new(
        store: Store,
        identity: Identity,
        transports: Vec<Arc<dyn Transport>>,
        discovery: Option<Arc<dyn Discovery>>,
    ) -> Self {
        Self {
            store,
            identity,
            transports,
            discovery,
            chain_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Send a chat message. See [`submit`](Self::submit).
    pub async fn send_text(&self, to: &Fingerprint, text: &str) -> Option<Submission> {
        self.submit(to, Payload::chat(text)).await
    }

    /// Build, persist and try to deliver one transition. `None` means the
    /// transition could not even be stored; the cause has been logged.
    pub async fn submit(&self, to: &Fingerprint, payload: Payload) -> Option<Submission> {
        match self.try_submit(to, payload).await {
            Ok(submission) => Some(submission),
            Err(e) => {
                warn!(to = %to.short(), error = %e, "submit failed before delivery");
                None
            }
        }
    }

    async fn try_submit(&self, to: &Fingerprint, payload: Payload) -> Result<Submission, DeliveryError> {
        let local = self.identity.fingerprint();
        let chain = ChainId::between(local, to);

        let sta = {
            let lock = self.chain_lock(&chain).await;
            let _guard = lock.lock().await;

            let sta = ledger::create_sta(&self.store, &self.identity, to, payload)?;
            if !ledger::commit_outgoing(&self.store, &sta, &self.identity.verifying_key())? {
                return Err(DeliveryError::Rejected(sta.nonce));
            }
            sta
        };

        let status = if to == local {
            self.confirm(&sta, "local")?;
            DeliveryStatus::Local
        } else {
            match self.deliver(&sta).await {
                Some(route) => DeliveryStatus::Delivered(route),
                None => DeliveryStatus::Pending,
            }
        };

        Ok(Submission {
            nonce: sta.nonce,
            chain,
            status,
        })
    }

    /// Re-attempt every outbox entry, oldest first.
    pub async fn retry_pending(&self) -> Result<RetryReport, DeliveryError> {
        let entries = self.store.with(|db| db.list_outbox())?;
        let mut report = RetryReport::default();

        for entry in entries {
            report.attempted += 1;
            if &entry.to == self.identity.fingerprint() {
                self.confirm(&entry.sta, "local")?;
                report.delivered += 1;
                continue;
            }
            if self.deliver(&entry.sta).await.is_some() {
                report.delivered += 1;
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                delivered = report.delivered,
                "outbox retry pass complete"
            );
        }
        Ok(report)
    }

    /// Validate and append an envelope received from a peer, under the same
    /// chain lock as [`submit`](Self::submit). When discovery knows the
    /// sender, the envelope's signing key must match the published one.
    pub async fn accept_inbound(&self, envelope: &TransitEnvelope) -> bool {
        let sender = &envelope.sta.from;
        if let Some(hrd) = self.lookup(sender).await {
            if hrd.sign_public_key != envelope.sender_sign_public_jwk {
                warn!(
                    nonce = %envelope.sta.nonce,
                    from = %sender.short(),
                    "envelope key differs from the sender's descriptor"
                );
                return false;
            }
        }

        let chain = envelope.sta.chain_id();
        let lock = self.chain_lock(&chain).await;
        let _guard = lock.lock().await;

        match ledger::accept_envelope(&self.store, self.identity.fingerprint(), envelope) {
            Ok(appended) => appended,
            Err(e) => {
                warn!(nonce = %envelope.sta.nonce, error = %e, "failed to append inbound envelope");
                false
            }
        }
    }

    pub fn messages(&self) -> Result<Vec<StoredMessage>, DeliveryError> {
        Ok(self.store.with(|db| db.list_messages())?)
    }

    pub fn pending_count(&self) -> Result<u64, DeliveryError> {
        Ok(self.store.with(|db| db.outbox_count())?)
    }

    // ---- internals ----

    async fn chain_lock(&self, chain: &ChainId) -> Arc<Mutex<()>> {
        self.chain_locks
            .lock()
            .await
            .entry(chain.clone())
            .or_default()
            .clone()
    }

    /// One delivery attempt. Success clears the outbox entry; failure only
    /// bumps its attempt counter.
    async fn deliver(&self, sta: &Sta) -> Option<DeliveryRoute> {
        let envelope = TransitEnvelope::new(sta.clone(), self.identity.sign_jwk());

        match self.attempt(&envelope).await {
            Ok(route) => {
                if let Err(e) = self.confirm(sta, &route.to_string()) {
                    warn!(nonce = %sta.nonce, error = %e, "delivered but outbox not cleared");
                }
                info!(nonce = %sta.nonce, to = %sta.to.short(), %route, "delivered");
                Some(route)
            }
            Err(e) => {
                warn!(nonce = %sta.nonce, to = %sta.to.short(), error = %e, "delivery attempt failed");
                if let Err(e) = self
                    .store
                    .with(|db| db.record_outbox_attempt(&sta.nonce, now_secs()))
                {
                    warn!(nonce = %sta.nonce, error = %e, "failed to record attempt");
                }
                None
            }
        }
    }

    async fn attempt(&self, envelope: &TransitEnvelope) -> Result<DeliveryRoute, DeliveryError> {
        if self.transports.is_empty() {
            return Err(DeliveryError::NoTransport);
        }

        let hrd = self.lookup(&envelope.sta.to).await;
        let mut failures = Vec::new();

        for transport in &self.transports {
            let route = transport.route();
            match transport.send(envelope, hrd.as_ref()).await {
                Ok(true) => return Ok(route),
                Ok(false) => debug!(%route, nonce = %envelope.sta.nonce, "transport not applicable"),
                Err(e) => {
                    warn!(%route, nonce = %envelope.sta.nonce, error = %e, "transport failed");
                    failures.push(format!("{route}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Err(DeliveryError::Undelivered("no transport applied".into()))
        } else {
            Err(DeliveryError::Undelivered(failures.join("; ")))
        }
    }

    async fn lookup(&self, target: &Fingerprint) -> Option<Hrd> {
        let discovery = self.discovery.as_ref()?;
        let hrd = discovery.query_reachability(target).await;
        match &hrd {
            Some(found) if &found.identity != target => {
                warn!(target = %target.short(), "discovery returned a descriptor for someone else");
                return None;
            }
            Some(found) if !found.is_self_consistent() => {
                warn!(target = %target.short(), "descriptor keys do not match its identity");
                return None;
            }
            Some(_) => debug!(target = %target.short(), "reachability resolved"),
            None => debug!(target = %target.short(), "no reachability descriptor"),
        }
        hrd
    }

    /// Clear the outbox entry and record a delivery proof, atomically.
    fn confirm(&self, sta: &Sta, route: &str) -> Result<(), StoreError> {
        let proof = canonicalize(&json!({
            "nonce": sta.nonce,
            "route": route,
            "delivered_at": now_secs(),
        }));
        self.store.transaction(|db| {
            db.delete_outbox(&sta.nonce)?;
            db.insert_proof(Some(&sta.nonce), proof.as_bytes())?;
            Ok(())
        })
    }
}

#[async_trait]
impl Inbound for DeliveryOrchestrator {
    async fn accept(&self, envelope: &TransitEnvelope) -> bool {
        self.accept_inbound(envelope).await
    }
}
