//! Client configuration loaded from `HSN_*` environment variables.
//!
//! Every capability that depends on infrastructure is optional: without
//! signal nodes discovery and direct delivery are off, without a transit base
//! the fallback transport is disabled.

use std::path::PathBuf;
use std::time::Duration;

use hsn_shared::constants::{
    DEFAULT_TRANSIT_TTL_SECS, DIRECT_SEND_TIMEOUT_MS, DISCOVERY_QUERY_TIMEOUT_MS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// SQLite file. Env: `HSN_DB_PATH`. Default: platform data directory.
    pub db_path: Option<PathBuf>,

    /// Rendezvous WebSocket endpoints. Env: `HSN_SIGNAL_NODES` (comma separated).
    pub signal_nodes: Vec<String>,

    /// Default transit gateway base URL. Env: `HSN_TRANSIT_BASE`.
    pub transit_base: Option<String>,

    /// Env: `HSN_TRANSIT_TTL_SECS`. Default: `300`.
    pub transit_ttl_secs: u64,

    /// Env: `HSN_POLL_INTERVAL_SECS`. Default: `30`.
    pub poll_interval: Duration,

    /// Env: `HSN_RETRY_INTERVAL_SECS`. Default: `60`.
    pub retry_interval: Duration,

    /// Env: `HSN_DISCOVERY_TIMEOUT_MS`. Default: `4000`.
    pub discovery_timeout: Duration,

    /// Env: `HSN_DIRECT_TIMEOUT_MS`. Default: `5000`.
    pub direct_timeout: Duration,

    /// Advertise and accept direct sessions. Env: `HSN_ADVERTISE_DIRECT`.
    /// Default: `true`.
    pub advertise_direct: bool,

    /// Env: `HSN_STUN_SERVERS` (comma separated).
    pub stun_servers: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            signal_nodes: Vec::new(),
            transit_base: None,
            transit_ttl_secs: DEFAULT_TRANSIT_TTL_SECS,
            poll_interval: Duration::from_secs(30),
            retry_interval: Duration::from_secs(60),
            discovery_timeout: Duration::from_millis(DISCOVERY_QUERY_TIMEOUT_MS),
            direct_timeout: Duration::from_millis(DIRECT_SEND_TIMEOUT_MS),
            advertise_direct: true,
            stun_servers: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = non_empty(lookup("HSN_DB_PATH")) {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(nodes) = lookup("HSN_SIGNAL_NODES") {
            config.signal_nodes = split_list(&nodes);
        }
        config.transit_base = non_empty(lookup("HSN_TRANSIT_BASE"));
        if let Some(servers) = lookup("HSN_STUN_SERVERS") {
            config.stun_servers = split_list(&servers);
        }

        if let Some(secs) = parse(&lookup, "HSN_TRANSIT_TTL_SECS") {
            config.transit_ttl_secs = secs;
        }
        if let Some(secs) = parse(&lookup, "HSN_POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "HSN_RETRY_INTERVAL_SECS") {
            config.retry_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse(&lookup, "HSN_DISCOVERY_TIMEOUT_MS") {
            config.discovery_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "HSN_DIRECT_TIMEOUT_MS") {
            config.direct_timeout = Duration::from_millis(ms);
        }
        if let Some(flag) = parse(&lookup, "HSN_ADVERTISE_DIRECT") {
            config.advertise_direct = flag;
        }

        config
    }

    pub fn discovery_enabled(&self) -> bool {
        !self.signal_nodes.is_empty()
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
