use axum::routing::get;
use axum::Router;

use crate::handlers::runs;
use crate::state::AppState;
use crate::ws;

/// Run routes, mounted at `/runs`.
///
/// ```text
/// GET    /                          -> list_runs
/// POST   /                          -> create_run
/// GET    /{id}                      -> get_run
/// GET    /{id}/artifacts/{name}     -> get_artifact
/// GET    /{id}/download.zip         -> download_bundle
/// GET    /{id}/events/ws            -> run_events_ws
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(runs::list_runs).post(runs::create_run))
        .route("/{id}", get(runs::get_run))
        .route("/{id}/artifacts/{name}", get(runs::get_artifact))
        .route("/{id}/download.zip", get(runs::download_bundle))
        .route("/{id}/events/ws", get(ws::run_events_ws))
}
