use thiserror::Error;

#[derive(Error, Debug)]
pub enum HsnError {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Canonicalization error: {0}")]
    Canonical(#[from] CanonicalError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid JWK: {0}")]
    InvalidJwk(String),

    #[error("Invalid signature encoding")]
    InvalidSignature,

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Stored identity does not match its fingerprint")]
    FingerprintMismatch,
}

#[derive(Error, Debug)]
pub enum CanonicalError {
    #[error("Value cannot be represented as JSON: {0}")]
    NotJson(#[from] serde_json::Error),
}
