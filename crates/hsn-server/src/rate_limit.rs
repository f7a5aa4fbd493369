//! Per-IP token bucket applied to every gateway and rendezvous request.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_seen: Instant,
}

impl Bucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_seen: now,
        }
    }

    fn take(&mut self, now: Instant, rate: f64, capacity: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_seen).as_secs_f64();
        self.last_seen = now;
        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.rate_limit_per_sec, config.rate_limit_burst)
    }

    pub async fn check(&self, ip: IpAddr) -> bool {
        self.check_at(Instant::now(), ip).await
    }

    async fn check_at(&self, now: Instant, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(ip)
            .or_insert_with(|| Bucket::full(self.capacity, now))
            .take(now, self.rate, self.capacity)
    }

    /// Forget clients idle for longer than `max_idle_secs`.
    pub async fn purge_stale(&self, max_idle_secs: f64) -> usize {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            now.saturating_duration_since(bucket.last_seen).as_secs_f64() < max_idle_secs
        });
        before - buckets.len()
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(ip) = client_ip(&req) {
        if !limiter.check(ip).await {
            warn!(ip = %ip, path = %req.uri().path(), "rate limit exceeded");
            return Err(ServerError::RateLimited);
        }
    }

    Ok(next.run(req).await)
}

/// ConnectInfo first, then X-Forwarded-For, then X-Real-IP.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(addr.ip());
    }

    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

    if let Some(forwarded) = header("x-forwarded-for") {
        if let Some(Ok(ip)) = forwarded.split(',').next().map(|first| first.trim().parse::<IpAddr>()) {
            return Some(ip);
        }
    }

    header("x-real-ip").and_then(|value| value.trim().parse::<IpAddr>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_burst_then_refill() {
        let limiter = RateLimiter::new(2.0, 3.0);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at(now, ip).await);
        }
        assert!(!limiter.check_at(now, ip).await);

        // Half a second at 2/s buys exactly one more request.
        let later = now + Duration::from_millis(500);
        assert!(limiter.check_at(later, ip).await);
        assert!(!limiter.check_at(later, ip).await);
    }

    #[tokio::test]
    async fn test_buckets_are_per_ip() {
        let limiter = RateLimiter::new(0.0, 1.0);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a).await);
        assert!(!limiter.check(a).await);
        assert!(limiter.check(b).await);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = RateLimiter::from_config(&ServerConfig::default());
        assert!(limiter.check("192.168.1.1".parse().unwrap()).await);
        assert_eq!(limiter.purge_stale(0.0).await, 1);
        assert!(limiter.buckets.lock().await.is_empty());
    }

    #[test]
    fn test_client_ip_headers() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), Some("203.0.113.7".parse().unwrap()));

        let req = Request::builder()
            .header("x-real-ip", " 198.51.100.2 ")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), Some("198.51.100.2".parse().unwrap()));

        let req = Request::builder().body(()).unwrap();
        assert_eq!(client_ip(&req), None);
    }
}
