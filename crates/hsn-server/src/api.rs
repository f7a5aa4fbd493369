use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::{Method, StatusCode},
    middleware,
    response::Response,
    routing::{delete, get, put},
    Json, Router,
};
use hsn_shared::constants::PROTOCOL_VERSION;
use hsn_shared::{Fingerprint, StoredEnvelope, TransitEnvelope};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::rendezvous::Rendezvous;
use crate::transit_store::TransitStore;

#[derive(Clone)]
pub struct AppState {
    pub transit: Arc<TransitStore>,
    pub rendezvous: Arc<Rendezvous>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            transit: Arc::new(TransitStore::new(config.max_envelopes_per_recipient)),
            rendezvous: Arc::new(Rendezvous::new(Duration::from_secs(config.hrd_ttl_secs))),
            rate_limiter: RateLimiter::from_config(&config),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    // The upload handler reports oversized envelopes itself.
    let body_limit = state.config.max_envelope_bytes.saturating_mul(2);

    Router::new()
        .route("/health", get(health_check))
        .route("/poll", get(poll))
        .route("/upload", put(upload))
        .route("/delete", delete(delete_envelope))
        .route("/ws", get(ws_upgrade))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    protocol: &'static str,
    held_envelopes: usize,
}

#[derive(Deserialize)]
struct HikQuery {
    hik: Fingerprint,
}

#[derive(Deserialize)]
struct UploadQuery {
    hik: Fingerprint,
    ttl: Option<u64>,
}

#[derive(Deserialize)]
struct DeleteQuery {
    hik: Fingerprint,
    id: String,
}

#[derive(Serialize)]
struct UploadResponse {
    id: String,
    ttl: u64,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
        held_envelopes: state.transit.total().await,
    })
}

async fn poll(
    State(state): State<AppState>,
    Query(query): Query<HikQuery>,
) -> Json<Vec<StoredEnvelope>> {
    let envelopes = state.transit.list(&query.hik).await;
    debug!(hik = %query.hik.short(), count = envelopes.len(), "poll");
    Json(envelopes)
}

async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), ServerError> {
    let max = state.config.max_envelope_bytes;
    if body.len() > max {
        return Err(ServerError::EnvelopeTooLarge {
            size: body.len(),
            max,
        });
    }

    let envelope: TransitEnvelope = serde_json::from_slice(&body)
        .map_err(|e| ServerError::BadRequest(format!("Malformed envelope: {e}")))?;

    if envelope.sta.to != query.hik {
        return Err(ServerError::BadRequest(
            "Envelope recipient does not match hik".into(),
        ));
    }

    let key = envelope
        .sender_sign_public_jwk
        .to_verifying_key()
        .map_err(|e| ServerError::BadRequest(format!("Invalid sender key: {e}")))?;
    envelope
        .sta
        .verify(&key)
        .map_err(|_| ServerError::Forbidden("Envelope signature does not verify".into()))?;

    let ttl = effective_ttl(query.ttl, &state.config);
    let nonce = envelope.sta.nonce.clone();
    let id = state
        .transit
        .put(&query.hik, envelope, Duration::from_secs(ttl))
        .await?;

    info!(
        hik = %query.hik.short(),
        id = %id,
        nonce = %nonce,
        ttl,
        size = body.len(),
        "envelope uploaded"
    );
    Ok((StatusCode::CREATED, Json(UploadResponse { id, ttl })))
}

async fn delete_envelope(
    State(state): State<AppState>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if !state.transit.delete(&query.hik, &query.id).await {
        return Err(ServerError::EnvelopeNotFound(query.id));
    }
    debug!(hik = %query.hik.short(), id = %query.id, "envelope deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<HikQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let rendezvous = state.rendezvous.clone();
    let hik = query.hik;
    ws.max_message_size(state.config.max_envelope_bytes)
        .on_upgrade(move |socket| rendezvous.run_session(hik, socket))
}

/// Requested TTL clamped to `1..=max_ttl_secs`; the default when absent.
fn effective_ttl(requested: Option<u64>, config: &ServerConfig) -> u64 {
    requested
        .unwrap_or(config.default_ttl_secs)
        .clamp(1, config.max_ttl_secs.max(1))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(state, listener).await
}

/// Serve on an already bound listener.
pub async fn serve_on(state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting gateway and rendezvous server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
