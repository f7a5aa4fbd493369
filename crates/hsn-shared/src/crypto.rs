use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::constants::{GENESIS_PREFIX, SIGNATURE_SIZE};
use crate::error::IdentityError;
use crate::types::Fingerprint;

/// BLAKE3 of a UTF-8 string, lowercase hex.
pub fn hash_hex(data: &str) -> String {
    blake3::hash(data.as_bytes()).to_hex().to_string()
}

/// Head hash of an empty chain whose first transition is addressed to `salt`.
pub fn genesis_hash(salt: &Fingerprint) -> String {
    hash_hex(&format!("{GENESIS_PREFIX}{salt}"))
}

pub fn encode_signature(signature: &Signature) -> String {
    STANDARD.encode(signature.to_bytes())
}

pub fn decode_signature(encoded: &str) -> Result<Signature, IdentityError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| IdentityError::InvalidSignature)?;
    if bytes.len() != SIGNATURE_SIZE {
        return Err(IdentityError::InvalidSignature);
    }
    Signature::from_slice(&bytes).map_err(|_| IdentityError::InvalidSignature)
}

/// Verify a base64 signature over `message`.
pub fn verify_signature(
    key: &VerifyingKey,
    message: &[u8],
    encoded_signature: &str,
) -> Result<(), IdentityError> {
    let signature = decode_signature(encoded_signature)?;
    key.verify(message, &signature)
        .map_err(|_| IdentityError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash_hex("abc"), hash_hex("abc"));
        assert_ne!(hash_hex("abc"), hash_hex("abd"));
        assert_eq!(hash_hex("abc").len(), 64);
    }

    #[test]
    fn test_genesis_depends_on_salt() {
        let a = Fingerprint::new("aa");
        let b = Fingerprint::new("bb");
        assert_eq!(genesis_hash(&a), hash_hex("genesis:aa"));
        assert_ne!(genesis_hash(&a), genesis_hash(&b));
    }

    #[test]
    fn test_signature_roundtrip() {
        let id = Identity::generate();
        let sig = encode_signature(&id.sign(b"payload"));
        assert!(verify_signature(&id.verifying_key(), b"payload", &sig).is_ok());
        assert!(verify_signature(&id.verifying_key(), b"other", &sig).is_err());
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let id = Identity::generate();
        assert!(matches!(
            verify_signature(&id.verifying_key(), b"x", "not base64!"),
            Err(IdentityError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature(&id.verifying_key(), b"x", &STANDARD.encode([0u8; 12])),
            Err(IdentityError::InvalidSignature)
        ));
    }
}
