//! Keyed token-bucket limiting.
//!
//! [`KeyedLimiter`] is generic over what it counts. The HTTP surface keys it
//! by client IP; code issuance keys a second one by normalized phone number,
//! so a single phone cannot be flooded with SMS from many addresses.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::ServerError;

/// Bucket shape: up to `burst` hits at once, refilled at `per_sec`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    pub burst: f64,
    pub per_sec: f64,
}

impl Quota {
    pub fn new(burst: f64, per_sec: f64) -> Self {
        Self { burst, per_sec }
    }

    /// `count` hits per `period`, all available up front.
    pub fn per_period(count: u32, period: Duration) -> Self {
        let count = f64::from(count.max(1));
        Self::new(count, count / period.as_secs_f64().max(f64::EPSILON))
    }

    fn wait_for_one(&self, tokens: f64) -> Duration {
        if self.per_sec <= 0.0 {
            return Duration::MAX;
        }
        let secs = ((1.0 - tokens) / self.per_sec).max(0.0);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Whole seconds a client should wait, rounded up, at least one.
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Decision::Allowed => 0,
            Decision::Limited { retry_after } => {
                let secs = retry_after.as_secs_f64().ceil();
                if secs.is_finite() {
                    (secs as u64).max(1)
                } else {
                    u64::MAX
                }
            }
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_seen: Instant,
}

#[derive(Clone)]
pub struct KeyedLimiter<K> {
    buckets: Arc<Mutex<HashMap<K, Bucket>>>,
    quota: Quota,
}

/// Per-client limiter applied to every HTTP request.
pub type RateLimiter = KeyedLimiter<IpAddr>;

/// Per-phone limiter applied to code issuance.
pub type PhoneLimiter = KeyedLimiter<String>;

impl<K: Eq + Hash + Clone> KeyedLimiter<K> {
    pub fn new(quota: Quota) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            quota,
        }
    }

    pub async fn check(&self, key: &K) -> Decision {
        self.check_at(key, Instant::now()).await
    }

    /// Spend one token for `key` at `now`, or report how long until one is due.
    pub async fn check_at(&self, key: &K, now: Instant) -> Decision {
        let quota = self.quota;
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.clone()).or_insert(Bucket {
            tokens: quota.burst,
            last_seen: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_seen).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * quota.per_sec).min(quota.burst);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Allowed
        } else {
            Decision::Limited {
                retry_after: quota.wait_for_one(bucket.tokens),
            }
        }
    }

    /// Forget keys not seen for `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .await
            .retain(|_, b| now.saturating_duration_since(b.last_seen) < max_idle);
    }

    pub async fn tracked(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(ip) = client_ip(&req) {
        let decision = limiter.check(&ip).await;
        if !decision.is_allowed() {
            warn!(ip = %ip, path = %req.uri().path(), "Rate limit exceeded");
            return Err(ServerError::TooManyRequests {
                retry_after_secs: decision.retry_after_secs(),
            });
        }
    }
    Ok(next.run(req).await)
}

/// Peer address first, then `X-Forwarded-For`, then `X-Real-IP`.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip());
    }

    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| header("x-real-ip").and_then(|v| v.trim().parse().ok()))
}
