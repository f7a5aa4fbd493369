//! Fallback transport: store-and-forward through an HTTP transit gateway.
//!
//! Gateway surface:
//! - `PUT    /upload?hik=<fp>&ttl=<secs>`  body `{sta, senderSignPublicJwk}`
//! - `GET    /poll?hik=<fp>`               `[{id, sta, senderSignPublicJwk}]`
//! - `DELETE /delete?hik=<fp>&id=<id>`

use std::time::Duration;

use async_trait::async_trait;
use hsn_shared::constants::HIK_PARAM;
use hsn_shared::protocol::StoredEnvelope;
use hsn_shared::types::DeliveryRoute;
use hsn_shared::{Fingerprint, Hrd, TransitEnvelope};
use hsn_store::Store;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::NetError;
use crate::transport::{Inbound, Transport};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

pub struct FallbackTransport {
    http: reqwest::Client,
    default_gateway: Option<String>,
    ttl_secs: u64,
}

/// Outcome of one polling pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub appended: usize,
    pub rejected: usize,
}

impl FallbackTransport {
    pub fn new(default_gateway: Option<String>, ttl_secs: u64) -> Result<Self, NetError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            default_gateway: default_gateway.map(|g| g.trim_end_matches('/').to_string()),
            ttl_secs,
        })
    }

    pub fn default_gateway(&self) -> Option<&str> {
        self.default_gateway.as_deref()
    }

    /// Gateway and TTL for an upload: the descriptor's when it advertises
    /// one, otherwise the configured default.
    fn upload_target(&self, hrd: Option<&Hrd>) -> Result<(String, u64), NetError> {
        if let Some(fallback) = hrd.and_then(|h| h.reachability.fallback.as_ref()) {
            let gateway = fallback.gateway_url.trim_end_matches('/').to_string();
            return Ok((gateway, fallback.ttl_seconds));
        }
        match &self.default_gateway {
            Some(gateway) => Ok((gateway.clone(), self.ttl_secs)),
            None => Err(NetError::FallbackDisabled),
        }
    }

    fn own_gateway(&self) -> Result<&str, NetError> {
        self.default_gateway
            .as_deref()
            .ok_or(NetError::FallbackDisabled)
    }

    /// Upload one envelope. `Ok(true)` once the gateway accepted it.
    pub async fn send_to_transit(&self, envelope: &TransitEnvelope, hrd: Option<&Hrd>) -> Result<bool, NetError> {
        let (gateway, ttl) = self.upload_target(hrd)?;
        let recipient = envelope.sta.to.as_str();
        let ttl_param = ttl.to_string();

        let response = self
            .http
            .put(format!("{gateway}/upload"))
            .query(&[(HIK_PARAM, recipient), ("ttl", ttl_param.as_str())])
            .json(envelope)
            .send()
            .await?;

        check_status(response).await?;
        info!(
            nonce = %envelope.sta.nonce,
            gateway = %gateway,
            ttl,
            "envelope accepted by transit gateway"
        );
        Ok(true)
    }

    /// Raw envelope list waiting for `hik` on the default gateway.
    pub async fn fetch(&self, hik: &Fingerprint) -> Result<Vec<Value>, NetError> {
        let gateway = self.own_gateway()?;
        let response = self
            .http
            .get(format!("{gateway}/poll"))
            .query(&[(HIK_PARAM, hik.as_str())])
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    pub async fn delete(&self, hik: &Fingerprint, id: &str) -> Result<(), NetError> {
        let gateway = self.own_gateway()?;
        let response = self
            .http
            .delete(format!("{gateway}/delete"))
            .query(&[(HIK_PARAM, hik.as_str()), ("id", id)])
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Fetch everything waiting for `hik`, record it in the inbox, hand each
    /// envelope to `inbound` and delete exactly the appended ones from the
    /// gateway. Rejected envelopes stay on the gateway until their TTL runs
    /// out.
    pub async fn poll_transit(
        &self,
        store: &Store,
        hik: &Fingerprint,
        inbound: &dyn Inbound,
    ) -> Result<PollReport, NetError> {
        let gateway = self.own_gateway()?.to_string();
        let items = self.fetch(hik).await?;

        let mut report = PollReport {
            fetched: items.len(),
            ..Default::default()
        };

        for item in items {
            let raw = item.to_string();
            let raw_id = item.get("id").and_then(Value::as_str).map(str::to_string);
            if !store.with(|db| db.insert_inbox(raw_id.as_deref(), &gateway, &raw))? {
                debug!(id = ?raw_id, "envelope already in inbox");
            }

            let stored: StoredEnvelope = match serde_json::from_value(item) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(id = ?raw_id, error = %e, "unparseable envelope on gateway");
                    report.rejected += 1;
                    continue;
                }
            };

            let (id, envelope) = stored.into_transit();
            if inbound.accept(&envelope).await {
                report.appended += 1;
                if let Err(e) = self.delete(hik, &id).await {
                    warn!(id = %id, error = %e, "appended envelope not deleted from gateway");
                }
            } else {
                debug!(id = %id, nonce = %envelope.sta.nonce, "envelope rejected, left on gateway");
                report.rejected += 1;
            }
        }

        if report.fetched > 0 {
            info!(
                fetched = report.fetched,
                appended = report.appended,
                rejected = report.rejected,
                "transit poll complete"
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl Transport for FallbackTransport {
    fn route(&self) -> DeliveryRoute {
        DeliveryRoute::Fallback
    }

    async fn send(&self, envelope: &TransitEnvelope, hrd: Option<&Hrd>) -> Result<bool, NetError> {
        self.send_to_transit(envelope, hrd).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, NetError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NetError::Gateway {
        status: status.as_u16(),
        body,
    })
}
