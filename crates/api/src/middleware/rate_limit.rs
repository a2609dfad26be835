//! Sliding-window rate limiting of run creation.
//!
//! Each client keeps at most `limit` timestamps. Entries older than the
//! window are pruned lazily on the client's next request, and clients with
//! no recent activity are swept once the table grows past
//! [`SWEEP_THRESHOLD`].

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;

/// Table size above which idle clients are dropped.
const SWEEP_THRESHOLD: usize = 1024;

/// Identifier used to bucket requests when nothing better is known.
const UNKNOWN_CLIENT: &str = "unknown";

/// Client identity: first `X-Forwarded-For` hop, else the peer IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(ip) = forwarded {
            return Ok(ClientIp(ip.to_string()));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientIp(peer.unwrap_or_else(|| UNKNOWN_CLIENT.to_string())))
    }
}

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    clients: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// `limit == 0` disables limiting.
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0 && !self.window.is_zero()
    }

    /// Record a request from `client`, or return how long it must wait.
    pub fn check(&self, client: &str) -> Result<(), Duration> {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&self, client: &str, now: Instant) -> Result<(), Duration> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut clients = self.lock();
        if clients.len() > SWEEP_THRESHOLD && !clients.contains_key(client) {
            let window = self.window;
            clients.retain(|_, hits| {
                hits.back()
                    .is_some_and(|last| now.saturating_duration_since(*last) < window)
            });
        }

        let hits = clients.entry(client.to_string()).or_default();
        while hits
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            hits.pop_front();
        }

        if hits.len() >= self.limit {
            let oldest = hits.front().copied().unwrap_or(now);
            let wait = self.window.saturating_sub(now.saturating_duration_since(oldest));
            tracing::debug!(client, wait_ms = wait.as_millis() as u64, "Rate limit exceeded");
            return Err(wait);
        }

        hits.push_back(now);
        Ok(())
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
