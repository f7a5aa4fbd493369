//! State chain engine.
//!
//! Builds, validates and appends signed state transitions. Each conversation
//! has its own chain ([`ChainId`]); its head hash is the hash of the last
//! appended record's canonical form, or the genesis hash salted with the
//! recipient when the chain is empty.
//!
//! Validation runs four checks in order and stops at the first failure:
//! signature, chain continuity, timestamp ordering, replay. Appending
//! re-validates and writes the chain row, the sync-log row and the message
//! projection in one transaction.

use ed25519_dalek::VerifyingKey;
use hsn_shared::crypto::{genesis_hash, hash_hex};
use hsn_shared::types::now_secs;
use hsn_shared::{ChainId, Fingerprint, Identity, Payload, Sta, TransitEnvelope};
use tracing::{debug, info, warn};

use crate::database::{Database, Store};
use crate::error::Result;

/// Why a transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BadSignature,
    BrokenChain,
    NonMonotonic,
    Replay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Rejection::BadSignature => "bad signature",
            Rejection::BrokenChain => "prev_state_hash does not match chain head",
            Rejection::NonMonotonic => "timestamp not after chain tail",
            Rejection::Replay => "nonce already applied",
        };
        f.write_str(reason)
    }
}

// ---- Chain head ----

impl Database {
    /// Head hash of `chain`. `salt` is only used when the chain is empty.
    pub fn chain_head_hash(&self, chain: &ChainId, salt: &Fingerprint) -> Result<String> {
        Ok(match self.chain_tail(chain)? {
            Some((record, _)) => hash_hex(&record),
            None => genesis_hash(salt),
        })
    }

    /// Run the four validation checks against the current state. Read-only.
    pub fn check_sta(&self, sta: &Sta, sender_key: &VerifyingKey) -> Result<Verdict> {
        if sta.verify(sender_key).is_err() {
            return Ok(Verdict::Rejected(Rejection::BadSignature));
        }

        let chain = sta.chain_id();
        let tail = self.chain_tail(&chain)?;

        let head = match &tail {
            Some((record, _)) => hash_hex(record),
            None => genesis_hash(&sta.to),
        };
        if sta.prev_state_hash != head {
            return Ok(Verdict::Rejected(Rejection::BrokenChain));
        }

        if let Some((_, last_timestamp)) = tail {
            if sta.timestamp <= last_timestamp {
                return Ok(Verdict::Rejected(Rejection::NonMonotonic));
            }
        }

        if self.sync_log_contains(&sta.nonce)? || self.chain_contains_nonce(&sta.nonce)? {
            return Ok(Verdict::Rejected(Rejection::Replay));
        }

        Ok(Verdict::Accepted)
    }

    /// Validate and, when accepted, write chain row + sync log + projection.
    /// Must be called inside a transaction.
    fn apply_sta(&self, sta: &Sta, sender_key: &VerifyingKey) -> Result<Verdict> {
        let verdict = self.check_sta(sta, sender_key)?;
        if !verdict.is_accepted() {
            return Ok(verdict);
        }

        self.insert_chain_entry(sta)?;
        self.insert_sync_log(&sta.nonce, sta.timestamp)?;
        if let Payload::ChatAppend(chat) = &sta.payload {
            self.insert_message(sta, &chat.text)?;
        }
        Ok(verdict)
    }
}

// ---- Engine operations ----

/// Head hash of the chain between `a` and `b`, with genesis salted by `salt`.
pub fn chain_head_hash(store: &Store, chain: &ChainId, salt: &Fingerprint) -> Result<String> {
    store.with(|db| db.chain_head_hash(chain, salt))
}

/// Build and sign a transition on top of the current head of the chain
/// between `identity` and `to`. Nothing is persisted.
///
/// The timestamp is `max(now, last + 1)` so two transitions created within
/// the same second stay strictly ordered.
pub fn create_sta(store: &Store, identity: &Identity, to: &Fingerprint, payload: Payload) -> Result<Sta> {
    let chain = ChainId::between(identity.fingerprint(), to);
    let (prev_state_hash, timestamp) = store.with(|db| {
        let tail = db.chain_tail(&chain)?;
        Ok(match tail {
            Some((record, last)) => (hash_hex(&record), now_secs().max(last + 1)),
            None => (genesis_hash(to), now_secs()),
        })
    })?;

    let sta = Sta::new_signed(identity, to.clone(), payload, prev_state_hash, timestamp);
    debug!(nonce = %sta.nonce, chain = %chain, kind = sta.kind(), "created STA");
    Ok(sta)
}

/// Full verdict for `sta` against the current store state.
pub fn check_sta(store: &Store, sta: &Sta, sender_key: &VerifyingKey) -> Result<Verdict> {
    store.with(|db| db.check_sta(sta, sender_key))
}

/// `true` when `sta` would be accepted right now.
pub fn validate_sta(store: &Store, sta: &Sta, sender_key: &VerifyingKey) -> Result<bool> {
    Ok(check_sta(store, sta, sender_key)?.is_accepted())
}

/// Re-validate and append atomically. `Ok(false)` means the transition was
/// rejected and nothing was written; `Err` means storage failed and the
/// transaction was rolled back.
pub fn append_sta(store: &Store, sta: &Sta, sender_key: &VerifyingKey) -> Result<bool> {
    let verdict = store.transaction(|db| db.apply_sta(sta, sender_key))?;
    match verdict {
        Verdict::Accepted => {
            info!(
                nonce = %sta.nonce,
                from = %sta.from.short(),
                kind = sta.kind(),
                "appended STA"
            );
            Ok(true)
        }
        Verdict::Rejected(reason) => {
            debug!(nonce = %sta.nonce, from = %sta.from.short(), %reason, "rejected STA");
            Ok(false)
        }
    }
}

/// Append our own transition and queue it in the outbox, atomically. A
/// rejected transition is neither appended nor queued, so nothing is ever
/// sent that the local chain does not hold.
pub fn commit_outgoing(store: &Store, sta: &Sta, sender_key: &VerifyingKey) -> Result<bool> {
    let verdict = store.transaction(|db| {
        let verdict = db.apply_sta(sta, sender_key)?;
        if verdict.is_accepted() {
            db.insert_outbox(sta)?;
        }
        Ok(verdict)
    })?;
    match verdict {
        Verdict::Accepted => {
            info!(nonce = %sta.nonce, to = %sta.to.short(), kind = sta.kind(), "queued STA");
            Ok(true)
        }
        Verdict::Rejected(reason) => {
            warn!(nonce = %sta.nonce, %reason, "own STA rejected by local chain");
            Ok(false)
        }
    }
}

/// Entry point for envelopes from either transport. Envelopes addressed to
/// someone other than `local` or carrying an unusable key are rejected.
///
/// The envelope's key is not tied to `sta.from` here: the envelope carries
/// only the signing half of the sender's fingerprint input. Callers that hold
/// the sender's reachability descriptor compare its signing key first.
pub fn accept_envelope(store: &Store, local: &Fingerprint, envelope: &TransitEnvelope) -> Result<bool> {
    let sta = &envelope.sta;
    if &sta.to != local {
        warn!(nonce = %sta.nonce, to = %sta.to.short(), "envelope not addressed to us");
        return Ok(false);
    }

    let key = match envelope.sender_sign_public_jwk.to_verifying_key() {
        Ok(key) => key,
        Err(e) => {
            warn!(nonce = %sta.nonce, error = %e, "envelope carries an unusable signing key");
            return Ok(false);
        }
    };

    append_sta(store, sta, &key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsn_shared::PublicJwk;
    use rusqlite::params;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn chat(text: &str) -> Payload {
        Payload::chat(text)
    }

    #[test]
    fn test_self_chat_scenario() {
        let store = store();
        let me = Identity::generate();
        let key = me.verifying_key();
        let fp = me.fingerprint().clone();

        let first = create_sta(&store, &me, &fp, chat("hello")).unwrap();
        assert_eq!(first.prev_state_hash, genesis_hash(&fp));
        assert!(validate_sta(&store, &first, &key).unwrap());
        assert!(append_sta(&store, &first, &key).unwrap());

        // Same STA again: rejected, nothing written.
        assert!(!append_sta(&store, &first, &key).unwrap());

        // Earlier timestamp on top of the new head.
        let head = chain_head_hash(&store, &first.chain_id(), &fp).unwrap();
        let stale = Sta::new_signed(&me, fp.clone(), chat("late"), head, first.timestamp - 1);
        assert_eq!(
            check_sta(&store, &stale, &key).unwrap(),
            Verdict::Rejected(Rejection::NonMonotonic)
        );
        assert!(!append_sta(&store, &stale, &key).unwrap());

        let messages = store.with(|db| db.list_messages()).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[0].nonce, first.nonce);
        assert_eq!(store.with(|db| db.sync_log_count()).unwrap(), 1);
    }

    #[test]
    fn test_chain_continuity() {
        let store = store();
        let alice = Identity::generate();
        let bob = Identity::generate();
        let key = alice.verifying_key();
        let to = bob.fingerprint().clone();

        let mut appended = Vec::new();
        for i in 0..4 {
            let sta = create_sta(&store, &alice, &to, chat(&format!("m{i}"))).unwrap();
            assert!(append_sta(&store, &sta, &key).unwrap());
            appended.push(sta);
        }

        let entries = store
            .with(|db| db.chain_entries(&ChainId::between(alice.fingerprint(), &to)))
            .unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].sta.prev_state_hash, genesis_hash(&to));
        for pair in entries.windows(2) {
            assert_eq!(pair[1].sta.prev_state_hash, hash_hex(&pair[0].sta.canonical()));
            assert!(pair[1].sta.timestamp > pair[0].sta.timestamp);
        }

        let head = chain_head_hash(&store, &entries[0].chain_id, &to).unwrap();
        assert_eq!(head, appended[3].head_hash());
    }

    #[test]
    fn test_head_hash_deterministic() {
        let store = store();
        let me = Identity::generate();
        let fp = me.fingerprint().clone();
        let chain = ChainId::between(&fp, &fp);

        let empty_a = chain_head_hash(&store, &chain, &fp).unwrap();
        let empty_b = chain_head_hash(&store, &chain, &fp).unwrap();
        assert_eq!(empty_a, empty_b);

        let sta = create_sta(&store, &me, &fp, chat("x")).unwrap();
        append_sta(&store, &sta, &me.verifying_key()).unwrap();
        assert_eq!(chain_head_hash(&store, &chain, &fp).unwrap(), sta.head_hash());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let store = store();
        let alice = Identity::generate();
        let mallory = Identity::generate();
        let sta = create_sta(&store, &alice, alice.fingerprint(), chat("x")).unwrap();

        assert_eq!(
            check_sta(&store, &sta, &mallory.verifying_key()).unwrap(),
            Verdict::Rejected(Rejection::BadSignature)
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let store = store();
        let me = Identity::generate();
        let mut sta = create_sta(&store, &me, me.fingerprint(), chat("original")).unwrap();
        sta.payload = chat("forged");
        assert!(!append_sta(&store, &sta, &me.verifying_key()).unwrap());
        assert_eq!(store.with(|db| db.sync_log_count()).unwrap(), 0);
    }

    #[test]
    fn test_fork_rejected() {
        let store = store();
        let me = Identity::generate();
        let key = me.verifying_key();
        let fp = me.fingerprint().clone();

        // Two STAs built against the same (empty) head.
        let a = create_sta(&store, &me, &fp, chat("a")).unwrap();
        let b = create_sta(&store, &me, &fp, chat("b")).unwrap();
        assert!(append_sta(&store, &a, &key).unwrap());
        assert_eq!(
            check_sta(&store, &b, &key).unwrap(),
            Verdict::Rejected(Rejection::BrokenChain)
        );
    }

    #[test]
    fn test_replayed_nonce_rejected() {
        let store = store();
        let me = Identity::generate();
        let key = me.verifying_key();
        let fp = me.fingerprint().clone();

        let first = create_sta(&store, &me, &fp, chat("first")).unwrap();
        append_sta(&store, &first, &key).unwrap();

        // Well-formed successor that reuses the first nonce.
        let mut replay = Sta::new_signed(
            &me,
            fp.clone(),
            chat("again"),
            first.head_hash(),
            first.timestamp + 10,
        );
        replay.nonce = first.nonce.clone();
        let signature = me.sign(replay.signing_input().as_bytes());
        replay.signature = hsn_shared::crypto::encode_signature(&signature);

        assert_eq!(
            check_sta(&store, &replay, &key).unwrap(),
            Verdict::Rejected(Rejection::Replay)
        );
    }

    #[test]
    fn test_unknown_type_chained_not_projected() {
        let store = store();
        let me = Identity::generate();
        let fp = me.fingerprint().clone();
        let payload = Payload::Opaque {
            kind: "profile.set".into(),
            body: serde_json::json!({ "name": "me" }),
        };

        let sta = create_sta(&store, &me, &fp, payload).unwrap();
        assert!(append_sta(&store, &sta, &me.verifying_key()).unwrap());
        assert_eq!(store.with(|db| db.chain_len(&sta.chain_id())).unwrap(), 1);
        assert!(store.with(|db| db.list_messages()).unwrap().is_empty());
    }

    #[test]
    fn test_append_is_atomic() {
        let store = store();
        let me = Identity::generate();
        let fp = me.fingerprint().clone();
        let sta = create_sta(&store, &me, &fp, chat("boom")).unwrap();

        // A stray projection row with the same nonce makes the last write fail.
        store
            .with(|db| {
                db.conn().execute(
                    "INSERT INTO messages (chain_id, nonce, from_fp, to_fp, timestamp, text, payload)
                     VALUES ('x', ?1, 'a', 'b', 0, '', '{}')",
                    params![sta.nonce],
                )?;
                Ok(())
            })
            .unwrap();

        assert!(append_sta(&store, &sta, &me.verifying_key()).is_err());
        assert_eq!(store.with(|db| db.chain_len(&sta.chain_id())).unwrap(), 0);
        assert!(!store.with(|db| db.sync_log_contains(&sta.nonce)).unwrap());
    }

    #[test]
    fn test_timestamps_strictly_increase_within_one_second() {
        let store = store();
        let me = Identity::generate();
        let key = me.verifying_key();
        let fp = me.fingerprint().clone();

        let mut last = i64::MIN;
        for i in 0..5 {
            let sta = create_sta(&store, &me, &fp, chat(&i.to_string())).unwrap();
            assert!(sta.timestamp > last);
            last = sta.timestamp;
            assert!(append_sta(&store, &sta, &key).unwrap());
        }
    }

    #[test]
    fn test_two_party_chains_agree() {
        let alice_store = store();
        let bob_store = store();
        let alice = Identity::generate();
        let bob = Identity::generate();

        // Alice sends, mirrors locally, Bob accepts.
        let m1 = create_sta(&alice_store, &alice, bob.fingerprint(), chat("hi bob")).unwrap();
        assert!(append_sta(&alice_store, &m1, &alice.verifying_key()).unwrap());
        let env = TransitEnvelope::new(m1.clone(), alice.sign_jwk());
        assert!(accept_envelope(&bob_store, bob.fingerprint(), &env).unwrap());

        // Bob replies on top of the shared head.
        let m2 = create_sta(&bob_store, &bob, alice.fingerprint(), chat("hi alice")).unwrap();
        assert_eq!(m2.prev_state_hash, m1.head_hash());
        assert!(append_sta(&bob_store, &m2, &bob.verifying_key()).unwrap());
        let env = TransitEnvelope::new(m2, bob.sign_jwk());
        assert!(accept_envelope(&alice_store, alice.fingerprint(), &env).unwrap());

        let chain = ChainId::between(alice.fingerprint(), bob.fingerprint());
        assert_eq!(
            chain_head_hash(&alice_store, &chain, bob.fingerprint()).unwrap(),
            chain_head_hash(&bob_store, &chain, bob.fingerprint()).unwrap()
        );
    }

    #[test]
    fn test_accept_envelope_checks_recipient_and_key() {
        let store = store();
        let alice = Identity::generate();
        let bob = Identity::generate();
        let carol = Identity::generate();

        let sta = create_sta(&store, &alice, bob.fingerprint(), chat("x")).unwrap();
        let env = TransitEnvelope::new(sta.clone(), alice.sign_jwk());
        assert!(!accept_envelope(&store, carol.fingerprint(), &env).unwrap());

        let bad_key = TransitEnvelope::new(
            sta,
            PublicJwk {
                kty: "OKP".into(),
                crv: "Ed25519".into(),
                x: "not-base64url!".into(),
            },
        );
        assert!(!accept_envelope(&store, bob.fingerprint(), &bad_key).unwrap());
    }

    #[test]
    fn test_commit_outgoing_appends_and_queues() {
        let store = store();
        let alice = Identity::generate();
        let bob = Identity::generate();
        let key = alice.verifying_key();

        let first = create_sta(&store, &alice, bob.fingerprint(), chat("one")).unwrap();
        let stale = create_sta(&store, &alice, bob.fingerprint(), chat("two")).unwrap();
        assert!(commit_outgoing(&store, &first, &key).unwrap());

        // Built on the old head: neither appended nor queued.
        assert!(!commit_outgoing(&store, &stale, &key).unwrap());
        assert_eq!(store.with(|db| db.outbox_count()).unwrap(), 1);
        assert_eq!(store.with(|db| db.chain_len(&first.chain_id())).unwrap(), 1);
    }

    #[test]
    fn test_commit_outgoing_rolls_back_outbox_on_store_failure() {
        let store = store();
        let alice = Identity::generate();
        let bob = Identity::generate();

        let sta = create_sta(&store, &alice, bob.fingerprint(), chat("lost")).unwrap();
        store
            .with(|db| Ok(db.conn().execute_batch("DROP TABLE sync_log")?))
            .unwrap();

        assert!(commit_outgoing(&store, &sta, &alice.verifying_key()).is_err());
        assert_eq!(store.with(|db| db.outbox_count()).unwrap(), 0);
        assert_eq!(store.with(|db| db.chain_len(&sta.chain_id())).unwrap(), 0);
    }
}
