use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use valuo_core::error::CoreError;
use valuo_core::types::RunId;
use valuo_events::EventLog;
use valuo_storage::StorageError;
use valuo_worker::RunRegistry;

use crate::error::{AppError, AppResult};
use crate::middleware::api_key::ApiKey;
use crate::state::AppState;

/// Where the stream learns whether more events can still arrive.
enum Source {
    /// Run held by the registry; it may still be progressing.
    Live(Arc<RunRegistry>),
    /// Run restored from its snapshot; the log is complete.
    Persisted,
}

/// GET /api/v1/runs/{id}/events/ws
///
/// Replays the run's events, then pushes new ones as JSON text frames until
/// the run is terminal and drained or the stream deadline passes.
pub async fn run_events_ws(
    _key: ApiKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let id = RunId::from(id);
    let registry = Arc::clone(state.orchestrator.registry());

    let (log, source) = match registry.events_of(&id).await {
        Some(log) => (log, Source::Live(registry)),
        None => match state.orchestrator.store().load(&id).await {
            Ok(record) => (Arc::new(EventLog::from_events(record.events)), Source::Persisted),
            Err(StorageError::NotFound(_)) => {
                return Err(AppError::Core(CoreError::NotFound {
                    entity: "Run",
                    id: id.to_string(),
                }))
            }
            Err(e) => return Err(e.into()),
        },
    };

    let ws = ws.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let max = state.config.event_stream_duration();
    Ok(ws.on_upgrade(move |socket| stream_events(socket, id, log, source, max)))
}

async fn stream_events(
    mut socket: WebSocket,
    id: RunId,
    log: Arc<EventLog>,
    source: Source,
    max: Duration,
) {
    tracing::debug!(run_id = %id, "Event stream opened");
    let deadline = tokio::time::Instant::now() + max;
    let mut changes = log.subscribe();
    let mut sent = 0usize;

    loop {
        let _ = changes.borrow_and_update();

        // Read the status before the log: once a terminal status is seen,
        // every event of the run is already in the log.
        let finished = match &source {
            Source::Live(registry) => registry
                .status_of(&id)
                .await
                .map_or(true, |status| status.is_terminal()),
            Source::Persisted => true,
        };

        for event in log.since(sent) {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(run_id = %id, error = %e, "Failed to encode event");
                    return;
                }
            };
            if socket.send(Message::Text(text.into())).await.is_err() {
                tracing::debug!(run_id = %id, "Event stream client went away");
                return;
            }
            sent += 1;
        }

        if finished {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!(run_id = %id, "Event stream deadline reached");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    tracing::debug!(run_id = %id, events = sent, "Event stream closed");
}
