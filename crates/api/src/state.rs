use std::sync::Arc;

use valuo_worker::Orchestrator;

use crate::config::ServerConfig;
use crate::middleware::rate_limit::RateLimiter;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Run engine: registry, queue, workers and run store.
    pub orchestrator: Arc<Orchestrator>,
    /// Per-client limiter applied to run creation.
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Build state around a started orchestrator. The rate limiter is sized
    /// from `config`.
    pub fn new(config: ServerConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit_n, config.rate_limit_window());
        Self {
            config: Arc::new(config),
            orchestrator,
            rate_limiter: Arc::new(rate_limiter),
        }
    }
}
