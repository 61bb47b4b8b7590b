use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::identity::bearer_token;
use crate::AppState;

/// Tokens left for one client, refilled lazily on each request.
#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    seen_at: Instant,
}

impl Bucket {
    fn take(&mut self, rate: f64, capacity: f64, now: Instant) -> bool {
        let refill = now.saturating_duration_since(self.seen_at).as_secs_f64() * rate;
        self.tokens = (self.tokens + refill).min(capacity);
        self.seen_at = now;
        let allowed = self.tokens >= 1.0;
        if allowed {
            self.tokens -= 1.0;
        }
        allowed
    }
}

/// Who a bucket belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// Verified session subject.
    Subject(String),
    Ip(IpAddr),
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientKey::Subject(sub) => write!(f, "sub:{sub}"),
            ClientKey::Ip(ip) => write!(f, "ip:{ip}"),
        }
    }
}

/// Token bucket per [`ClientKey`]: `rate` tokens per second up to a burst
/// of `capacity`.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<ClientKey, Bucket>>>,
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

    pub async fn check(&self, key: ClientKey) -> bool {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: ClientKey, now: Instant) -> bool {
        let capacity = self.capacity;
        self.buckets
            .lock()
            .await
            .entry(key)
            .or_insert_with(|| Bucket {
                tokens: capacity,
                seen_at: now,
            })
            .take(self.rate, capacity, now)
    }

    /// Drop buckets that have not been touched for `max_idle`.
    pub async fn purge_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.seen_at) < max_idle);
        let purged = before - buckets.len();
        if purged > 0 {
            debug!(purged, remaining = buckets.len(), "purged idle rate-limit buckets");
        }
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Some(key) = client_key(&state, &req) {
        if !state.rate_limiter.check(key.clone()).await {
            warn!(client = %key, "Rate limit exceeded");
            return GatewayError::RateLimited.into_response();
        }
    }

    next.run(req).await
}

/// Verified session subject if the request carries a valid bearer token,
/// otherwise the client IP.
fn client_key<B>(state: &AppState, req: &Request<B>) -> Option<ClientKey> {
    let subject = bearer_token(req.headers())
        .and_then(|token| state.identity.verify(token).ok())
        .map(|claims| ClientKey::Subject(claims.sub));

    subject.or_else(|| extract_client_ip(req).map(ClientKey::Ip))
}

/// Peer address from `ConnectInfo`, else the first `X-Forwarded-For` hop,
/// else `X-Real-IP`.
fn extract_client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    let header_ip = |name: &str, pick: fn(&str) -> Option<&str>| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(pick)
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    req.extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .or_else(|| header_ip("x-forwarded-for", |v| v.split(',').next()))
        .or_else(|| header_ip("x-real-ip", |v| Some(v)))
}
