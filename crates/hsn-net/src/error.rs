use thiserror::Error;

/// Errors produced by the transport layer.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("Gateway refused request ({status}): {body}")]
    Gateway { status: u16, body: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] hsn_store::StoreError),

    #[error("Timed out: {0}")]
    Timeout(&'static str),

    /// No transit gateway is configured or advertised.
    #[error("Fallback transport disabled: no gateway configured")]
    FallbackDisabled,

    /// The peer declined a direct session.
    #[error("Direct session rejected: {0}")]
    DirectRejected(String),

    #[error("Session negotiation failed: {0}")]
    Negotiation(String),

    /// No rendezvous node is connected.
    #[error("Discovery unavailable")]
    DiscoveryUnavailable,
}

impl From<tokio_tungstenite::tungstenite::Error> for NetError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        NetError::WebSocket(Box::new(e))
    }
}
