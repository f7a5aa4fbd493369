//! In-memory, TTL-bounded envelope storage keyed by recipient.
//!
//! Nothing survives a restart; the gateway is a best-effort mailbox and
//! senders keep their own outbox until an upload is accepted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use hsn_shared::protocol::StoredEnvelope;
use hsn_shared::{Fingerprint, TransitEnvelope};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::ServerError;

#[derive(Debug, Clone)]
struct Held {
    id: String,
    envelope: TransitEnvelope,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct TransitStore {
    mailboxes: Mutex<HashMap<Fingerprint, Vec<Held>>>,
    max_per_recipient: usize,
}

impl TransitStore {
    pub fn new(max_per_recipient: usize) -> Self {
        Self {
            mailboxes: Mutex::new(HashMap::new()),
            max_per_recipient,
        }
    }

    /// Hold `envelope` for `recipient` for `ttl`. Returns the envelope id.
    pub async fn put(
        &self,
        recipient: &Fingerprint,
        envelope: TransitEnvelope,
        ttl: Duration,
    ) -> Result<String, ServerError> {
        self.put_at(Instant::now(), recipient, envelope, ttl).await
    }

    async fn put_at(
        &self,
        now: Instant,
        recipient: &Fingerprint,
        envelope: TransitEnvelope,
        ttl: Duration,
    ) -> Result<String, ServerError> {
        let mut mailboxes = self.mailboxes.lock().await;
        let mailbox = mailboxes.entry(recipient.clone()).or_default();
        mailbox.retain(|held| held.expires_at > now);

        if mailbox.len() >= self.max_per_recipient {
            return Err(ServerError::MailboxFull(mailbox.len()));
        }

        let id = Uuid::new_v4().to_string();
        mailbox.push(Held {
            id: id.clone(),
            envelope,
            expires_at: now + ttl,
        });
        debug!(recipient = %recipient.short(), id = %id, ttl_secs = ttl.as_secs(), "envelope held");
        Ok(id)
    }

    /// Unexpired envelopes for `recipient`, oldest first. Polling does not
    /// remove anything.
    pub async fn list(&self, recipient: &Fingerprint) -> Vec<StoredEnvelope> {
        self.list_at(Instant::now(), recipient).await
    }

    async fn list_at(&self, now: Instant, recipient: &Fingerprint) -> Vec<StoredEnvelope> {
        let mailboxes = self.mailboxes.lock().await;
        mailboxes
            .get(recipient)
            .map(|mailbox| {
                mailbox
                    .iter()
                    .filter(|held| held.expires_at > now)
                    .map(|held| StoredEnvelope {
                        id: held.id.clone(),
                        sta: held.envelope.sta.clone(),
                        sender_sign_public_jwk: held.envelope.sender_sign_public_jwk.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns whether an envelope was removed.
    pub async fn delete(&self, recipient: &Fingerprint, id: &str) -> bool {
        let mut mailboxes = self.mailboxes.lock().await;
        let Some(mailbox) = mailboxes.get_mut(recipient) else {
            return false;
        };
        let before = mailbox.len();
        mailbox.retain(|held| held.id != id);
        let removed = mailbox.len() < before;
        if mailbox.is_empty() {
            mailboxes.remove(recipient);
        }
        removed
    }

    /// Drop expired envelopes and empty mailboxes. Returns how many
    /// envelopes were dropped.
    pub async fn purge_expired(&self) -> usize {
        self.purge_at(Instant::now()).await
    }

    async fn purge_at(&self, now: Instant) -> usize {
        let mut mailboxes = self.mailboxes.lock().await;
        let mut dropped = 0;
        mailboxes.retain(|_, mailbox| {
            let before = mailbox.len();
            mailbox.retain(|held| held.expires_at > now);
            dropped += before - mailbox.len();
            !mailbox.is_empty()
        });
        dropped
    }

    pub async fn total(&self) -> usize {
        self.mailboxes.lock().await.values().map(Vec::len).sum()
    }
}
