use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use valuo_worker::{OrchestratorConfig, RetryPolicy};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Directory holding one sub-directory per run.
    pub artifacts_root: PathBuf,
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Longest a run submission waits for a free queue slot.
    pub queue_submit_timeout_secs: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_backoff_base_secs: f64,
    /// Shared secret for the run endpoints. `None` disables the check.
    pub api_key: Option<String>,
    /// Run creations allowed per client per window. `0` disables limiting.
    pub rate_limit_n: usize,
    pub rate_limit_window_secs: f64,
    /// Longest a live event subscription stays open.
    pub event_stream_secs: u64,
    /// Build identifier written into every run's metadata.
    pub code_sha: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                 |
    /// |-----------------------------|-------------------------|
    /// | `HOST`                      | `0.0.0.0`               |
    /// | `PORT`                      | `8000`                  |
    /// | `CORS_ORIGINS`              | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                    |
    /// | `ARTIFACTS_ROOT`            | `artifacts`             |
    /// | `WORKER_COUNT`              | `2`                     |
    /// | `QUEUE_CAPACITY`            | `100`                   |
    /// | `QUEUE_SUBMIT_TIMEOUT_SECS` | `10`                    |
    /// | `MAX_RETRIES`               | `1`                     |
    /// | `RETRY_BACKOFF_BASE_SECS`   | `0.5`                   |
    /// | `API_KEY`                   | unset                   |
    /// | `RATE_LIMIT_N`              | `10`                    |
    /// | `RATE_LIMIT_WINDOW_SEC`     | `60`                    |
    /// | `EVENT_STREAM_SECS`         | `30`                    |
    /// | `CODE_SHA`                  | `dev`                   |
    ///
    /// Panics on values that do not parse.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api_key = std::env::var("API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let retry_backoff_base_secs: f64 = env_or("RETRY_BACKOFF_BASE_SECS", "0.5");
        assert!(
            retry_backoff_base_secs.is_finite() && retry_backoff_base_secs >= 0.0,
            "RETRY_BACKOFF_BASE_SECS must be a non-negative number"
        );
        let rate_limit_window_secs: f64 = env_or("RATE_LIMIT_WINDOW_SEC", "60");
        assert!(
            rate_limit_window_secs.is_finite() && rate_limit_window_secs > 0.0,
            "RATE_LIMIT_WINDOW_SEC must be a positive number"
        );

        Self {
            host,
            port: env_or("PORT", "8000"),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", "30"),
            artifacts_root: std::env::var("ARTIFACTS_ROOT")
                .unwrap_or_else(|_| "artifacts".into())
                .into(),
            worker_count: env_or("WORKER_COUNT", "2"),
            queue_capacity: env_or("QUEUE_CAPACITY", "100"),
            queue_submit_timeout_secs: env_or("QUEUE_SUBMIT_TIMEOUT_SECS", "10"),
            max_retries: env_or("MAX_RETRIES", "1"),
            retry_backoff_base_secs,
            api_key,
            rate_limit_n: env_or("RATE_LIMIT_N", "10"),
            rate_limit_window_secs,
            event_stream_secs: env_or("EVENT_STREAM_SECS", "30"),
            code_sha: std::env::var("CODE_SHA").unwrap_or_else(|_| "dev".into()),
        }
    }

    /// Engine settings derived from this configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            worker_count: self.worker_count.max(1),
            queue_capacity: self.queue_capacity.max(1),
            submit_timeout: Duration::from_secs(self.queue_submit_timeout_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                backoff_base: Duration::from_secs_f64(self.retry_backoff_base_secs.max(0.0)),
            },
        }
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit_window_secs.max(0.0))
    }

    pub fn event_stream_duration(&self) -> Duration {
        Duration::from_secs(self.event_stream_secs)
    }
}

/// Parse `key` from the environment, falling back to `default`.
fn env_or<T>(key: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.into());
    raw.trim()
        .parse()
        .unwrap_or_else(|e| panic!("{key} must be a valid {}: {e}", std::any::type_name::<T>()))
}
