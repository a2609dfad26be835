pub mod health;
pub mod runs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /runs                                create (POST), list (GET)
/// /runs/{id}                           get
/// /runs/{id}/artifacts/{name}          raw artifact
/// /runs/{id}/download.zip              zip bundle of all artifacts
/// /runs/{id}/events/ws                 live event stream (WebSocket)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/runs", runs::router())
}
