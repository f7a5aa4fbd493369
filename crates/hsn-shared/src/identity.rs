use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use x25519_dalek::{PublicKey as AgreementPublicKey, StaticSecret};

use crate::canonical::canonicalize;
use crate::constants::{JWK_CRV_ED25519, JWK_CRV_X25519, JWK_KTY_OKP, PUBKEY_SIZE};
use crate::crypto::hash_hex;
use crate::error::IdentityError;
use crate::types::Fingerprint;

/// A device identity: one Ed25519 signing keypair and one X25519
/// key-agreement keypair. The fingerprint derived from both public keys is
/// the participant's address everywhere else.
#[derive(Clone)]
pub struct Identity {
    fingerprint: Fingerprint,
    signing_key: SigningKey,
    agreement_secret: StaticSecret,
}

/// Persisted form of an identity. Only the store ever sees this.
#[derive(Serialize, Deserialize)]
pub struct IdentityExport {
    pub fingerprint: String,
    pub sign_secret: [u8; 32],
    pub agreement_secret: [u8; 32],
}

/// Public key in JWK form (RFC 8037 OKP keys).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
}

impl Identity {
    /// Generate a fresh identity from the OS RNG
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let agreement_secret = StaticSecret::random_from_rng(OsRng);
        Self::from_keys(signing_key, agreement_secret)
    }

    fn from_keys(signing_key: SigningKey, agreement_secret: StaticSecret) -> Self {
        let sign = PublicJwk::ed25519(&signing_key.verifying_key());
        let agree = PublicJwk::x25519(&AgreementPublicKey::from(&agreement_secret));
        let fingerprint = derive_fingerprint(&sign, &agree);
        Self {
            fingerprint,
            signing_key,
            agreement_secret,
        }
    }

    /// Restore a persisted identity, refusing records whose fingerprint
    /// does not match the keys.
    pub fn from_export(export: &IdentityExport) -> Result<Self, IdentityError> {
        let identity = Self::from_keys(
            SigningKey::from_bytes(&export.sign_secret),
            StaticSecret::from(export.agreement_secret),
        );
        if identity.fingerprint.as_str() != export.fingerprint {
            return Err(IdentityError::FingerprintMismatch);
        }
        Ok(identity)
    }

    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            fingerprint: self.fingerprint.0.clone(),
            sign_secret: self.signing_key.to_bytes(),
            agreement_secret: self.agreement_secret.to_bytes(),
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn agreement_public(&self) -> AgreementPublicKey {
        AgreementPublicKey::from(&self.agreement_secret)
    }

    pub fn sign_jwk(&self) -> PublicJwk {
        PublicJwk::ed25519(&self.verifying_key())
    }

    pub fn agreement_jwk(&self) -> PublicJwk {
        PublicJwk::x25519(&self.agreement_public())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl PublicJwk {
    pub fn ed25519(key: &VerifyingKey) -> Self {
        Self {
            kty: JWK_KTY_OKP.to_string(),
            crv: JWK_CRV_ED25519.to_string(),
            x: URL_SAFE_NO_PAD.encode(key.as_bytes()),
        }
    }

    pub fn x25519(key: &AgreementPublicKey) -> Self {
        Self {
            kty: JWK_KTY_OKP.to_string(),
            crv: JWK_CRV_X25519.to_string(),
            x: URL_SAFE_NO_PAD.encode(key.as_bytes()),
        }
    }

    pub fn to_verifying_key(&self) -> Result<VerifyingKey, IdentityError> {
        let bytes = self.key_bytes(JWK_CRV_ED25519)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| IdentityError::InvalidKeyBytes)
    }

    pub fn to_value(&self) -> Value {
        json!({ "kty": self.kty, "crv": self.crv, "x": self.x })
    }

    fn key_bytes(&self, expected_crv: &str) -> Result<[u8; PUBKEY_SIZE], IdentityError> {
        if self.kty != JWK_KTY_OKP || self.crv != expected_crv {
            return Err(IdentityError::InvalidJwk(format!(
                "expected {JWK_KTY_OKP}/{expected_crv}, got {}/{}",
                self.kty, self.crv
            )));
        }
        let raw = URL_SAFE_NO_PAD
            .decode(self.x.as_bytes())
            .map_err(|e| IdentityError::InvalidJwk(e.to_string()))?;
        raw.try_into().map_err(|_| IdentityError::InvalidKeyBytes)
    }
}

/// `hash(canonicalize({sign, agree}))` over the exported public keys.
pub fn derive_fingerprint(sign: &PublicJwk, agree: &PublicJwk) -> Fingerprint {
    let record = json!({ "sign": sign.to_value(), "agree": agree.to_value() });
    Fingerprint(hash_hex(&canonicalize(&record)))
}
