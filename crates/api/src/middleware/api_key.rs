//! Shared-secret guard for the run endpoints.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use valuo_core::error::CoreError;
use valuo_core::hashing::secrets_match;

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the API key. `Authorization: Bearer <key>` is accepted too.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Proof that the request presented the configured API key.
///
/// Always succeeds when no key is configured. Add it as the first extractor
/// of a handler so an unauthenticated request is rejected before anything
/// else happens:
///
/// ```ignore
/// async fn create_run(_key: ApiKey, State(state): State<AppState>) -> AppResult<()> { .. }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ApiKey;

impl FromRequestParts<AppState> for ApiKey {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.api_key.as_deref() else {
            return Ok(ApiKey);
        };

        let presented = presented_key(parts).ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized("Missing API key".into()))
        })?;

        if !secrets_match(presented, expected) {
            tracing::debug!("Rejected request with invalid API key");
            return Err(AppError::Core(CoreError::Unauthorized(
                "Invalid API key".into(),
            )));
        }
        Ok(ApiKey)
    }
}

/// The key from `X-API-Key`, else from a Bearer `Authorization` header.
fn presented_key(parts: &Parts) -> Option<&str> {
    let header = |name: &'static str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header(API_KEY_HEADER).or_else(|| {
        header("authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
    })
}
