/// Protocol version advertised by the rendezvous node
pub const PROTOCOL_VERSION: &str = "/hsn/1.0.0";

/// Prefix hashed together with the recipient fingerprint to seed an empty chain
pub const GENESIS_PREFIX: &str = "genesis:";

/// Transition type projected into the materialized message table
pub const CHAT_APPEND: &str = "chat.append";

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Maximum serialized envelope size accepted by the gateway and data channel (256 KiB)
pub const MAX_ENVELOPE_SIZE: usize = 262_144;

/// Retention requested from the transit gateway when the descriptor names none
pub const DEFAULT_TRANSIT_TTL_SECS: u64 = 300;

/// Discovery query timeout
pub const DISCOVERY_QUERY_TIMEOUT_MS: u64 = 4_000;

/// Direct transport attempt timeout
pub const DIRECT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Label of the WebRTC data channel carrying envelopes
pub const DATA_CHANNEL_LABEL: &str = "sta";

/// Query parameter carrying the caller's fingerprint on every endpoint
pub const HIK_PARAM: &str = "hik";

/// Default HTTP port of the gateway / rendezvous node
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// JWK parameters of the exported public keys
pub const JWK_KTY_OKP: &str = "OKP";
pub const JWK_CRV_ED25519: &str = "Ed25519";
pub const JWK_CRV_X25519: &str = "X25519";
