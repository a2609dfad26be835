//! Handlers for the `/runs` resource.
//!
//! Reads prefer the live registry and fall back to the run store, so runs
//! from before a restart stay readable.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use valuo_core::error::CoreError;
use valuo_core::run::{RunEvent, RunStatus, Summary};
use valuo_core::types::{RunId, Timestamp};
use valuo_storage::{is_safe_artifact_name, PersistedRunRecord, RunIndexEntry, StorageError};
use valuo_worker::Run;

use crate::error::{AppError, AppResult};
use crate::middleware::api_key::ApiKey;
use crate::middleware::rate_limit::ClientIp;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    #[serde(default)]
    pub company_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedRun {
    pub run_id: RunId,
    pub status: RunStatus,
}

/// Full view of one run.
#[derive(Debug, Serialize)]
pub struct RunView {
    pub run_id: RunId,
    pub company_name: String,
    pub status: RunStatus,
    pub attempts: u32,
    pub summary: Summary,
    pub artifacts: Vec<String>,
    pub events: Vec<RunEvent>,
    pub error: Option<String>,
    pub created_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl From<&Run> for RunView {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.id.clone(),
            company_name: run.company_name.clone(),
            status: run.status,
            attempts: run.attempts,
            summary: run.summary.clone(),
            artifacts: run.artifact_names(),
            events: run.events.snapshot(),
            error: run.error.clone(),
            created_at: Some(run.created_at),
            completed_at: run.completed_at,
        }
    }
}

impl From<PersistedRunRecord> for RunView {
    fn from(record: PersistedRunRecord) -> Self {
        Self {
            run_id: record.run_id,
            company_name: record.company_name,
            status: record.status,
            attempts: record.attempts,
            summary: record.summary,
            artifacts: record.artifacts,
            events: record.events,
            error: record.error,
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }
}

fn run_not_found(id: &RunId) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Run",
        id: id.to_string(),
    })
}

/// Content type served for an artifact, by file extension.
pub fn artifact_content_type(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("csv") => "text/csv; charset=utf-8",
        Some("md") => "text/markdown; charset=utf-8",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/runs
///
/// Checks run in order: API key, rate limit, body validation. Only then is
/// a queue slot reserved and the run created.
pub async fn create_run(
    _key: ApiKey,
    ClientIp(client): ClientIp,
    State(state): State<AppState>,
    body: Result<Json<CreateRunRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    if let Err(retry_after) = state.rate_limiter.check(&client) {
        tracing::info!(client = %client, "Run creation rate limited");
        return Err(AppError::RateLimited { retry_after });
    }

    let Json(input) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let company_name = input
        .company_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            AppError::Core(CoreError::Validation("company_name is required".into()))
        })?;

    let run = state.orchestrator.submit(company_name).await?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: CreatedRun {
                run_id: run.id,
                status: run.status,
            },
        }),
    ))
}

/// GET /api/v1/runs
///
/// Lists the persisted index, not the live registry.
pub async fn list_runs(
    _key: ApiKey,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<RunIndexEntry>>>> {
    let runs = state.orchestrator.store().list().await?;
    Ok(Json(DataResponse { data: runs }))
}

/// GET /api/v1/runs/{id}
pub async fn get_run(
    _key: ApiKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<RunView>>> {
    let id = RunId::from(id);
    if let Some(run) = state.orchestrator.get(&id).await {
        return Ok(Json(DataResponse {
            data: RunView::from(&run),
        }));
    }

    match state.orchestrator.store().load(&id).await {
        Ok(record) => Ok(Json(DataResponse {
            data: RunView::from(record),
        })),
        Err(StorageError::NotFound(_)) => Err(run_not_found(&id)),
        Err(e) => Err(e.into()),
    }
}

/// GET /api/v1/runs/{id}/artifacts/{name}
pub async fn get_artifact(
    _key: ApiKey,
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let id = RunId::from(id);
    if !is_safe_artifact_name(&name) {
        return Err(AppError::Storage(StorageError::NotFound(format!(
            "artifact {name}"
        ))));
    }

    let live = state
        .orchestrator
        .get(&id)
        .await
        .and_then(|run| run.artifacts.get(&name).cloned());

    let body = match live {
        Some(content) => content.into_bytes(),
        None => state.orchestrator.store().read_artifact(&id, &name).await?,
    };

    Ok(([(CONTENT_TYPE, artifact_content_type(&name))], body))
}

/// GET /api/v1/runs/{id}/download.zip
pub async fn download_bundle(
    _key: ApiKey,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = RunId::from(id);
    let archive = match state.orchestrator.store().bundle(&id).await {
        Ok(archive) => archive,
        Err(StorageError::NotFound(_)) => return Err(run_not_found(&id)),
        Err(e) => return Err(e.into()),
    };

    let disposition = format!("attachment; filename=\"{id}.zip\"");
    Ok((
        [
            (CONTENT_TYPE, "application/zip".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        archive,
    ))
}
