//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use hsn_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_TRANSIT_TTL_SECS, MAX_ENVELOPE_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Upper bound on an envelope's time to live, whatever the client asks.
    /// Env: `MAX_TTL_SECS`
    /// Default: `86400`
    pub max_ttl_secs: u64,

    /// TTL applied when an upload does not specify one.
    /// Env: `DEFAULT_TTL_SECS`
    /// Default: `300`
    pub default_ttl_secs: u64,

    /// Largest accepted upload body in bytes.
    /// Env: `MAX_ENVELOPE_BYTES`
    /// Default: 256 KiB
    pub max_envelope_bytes: usize,

    /// Envelopes held per recipient before uploads are refused.
    /// Env: `MAX_ENVELOPES_PER_RECIPIENT`
    /// Default: `1000`
    pub max_envelopes_per_recipient: usize,

    /// How long a published HRD stays queryable.
    /// Env: `HRD_TTL_SECS`
    /// Default: `86400`
    pub hrd_ttl_secs: u64,

    /// Sustained requests per second per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10`
    pub rate_limit_per_sec: f64,

    /// Burst capacity per client IP.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30`
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            max_ttl_secs: 86_400,
            default_ttl_secs: DEFAULT_TRANSIT_TTL_SECS,
            max_envelope_bytes: MAX_ENVELOPE_SIZE,
            max_envelopes_per_recipient: 1000,
            hrd_ttl_secs: 86_400,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        parse_into(&lookup, "MAX_TTL_SECS", &mut config.max_ttl_secs);
        parse_into(&lookup, "DEFAULT_TTL_SECS", &mut config.default_ttl_secs);
        parse_into(&lookup, "MAX_ENVELOPE_BYTES", &mut config.max_envelope_bytes);
        parse_into(
            &lookup,
            "MAX_ENVELOPES_PER_RECIPIENT",
            &mut config.max_envelopes_per_recipient,
        );
        parse_into(&lookup, "HRD_TTL_SECS", &mut config.hrd_ttl_secs);
        parse_into(&lookup, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        parse_into(&lookup, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);

        if config.default_ttl_secs > config.max_ttl_secs {
            tracing::warn!(
                default = config.default_ttl_secs,
                max = config.max_ttl_secs,
                "DEFAULT_TTL_SECS exceeds MAX_TTL_SECS, clamping"
            );
            config.default_ttl_secs = config.max_ttl_secs;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
        }
    }
}
