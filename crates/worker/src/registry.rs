//! In-memory registry of runs.
//!
//! A single coarse `RwLock` guards the map. No method performs I/O or awaits
//! anything but the lock itself. Event logs live outside the lock (each run
//! holds an `Arc<EventLog>`) so live readers never contend with workers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use valuo_core::error::CoreError;
use valuo_core::run::{Artifacts, RunStatus, Summary};
use valuo_core::types::{RunId, Timestamp};
use valuo_events::EventLog;
use valuo_storage::PersistedRunRecord;

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// One valuation run as seen by the registry. Cloning shares the event log.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: RunId,
    pub company_name: String,
    pub status: RunStatus,
    /// Attempts started so far.
    pub attempts: u32,
    pub events: Arc<EventLog>,
    pub summary: Summary,
    /// Non-empty only once the run completed.
    pub artifacts: Artifacts,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl Run {
    fn new(company_name: String) -> Self {
        Self {
            id: RunId::generate(),
            company_name,
            status: RunStatus::Queued,
            attempts: 0,
            events: Arc::new(EventLog::new()),
            summary: Summary::new(),
            artifacts: Artifacts::new(),
            error: None,
            created_at: chrono::Utc::now(),
            completed_at: None,
        }
    }

    pub fn artifact_names(&self) -> Vec<String> {
        self.artifacts.keys().cloned().collect()
    }

    /// Snapshot for the persistence layer.
    pub fn to_record(&self) -> PersistedRunRecord {
        PersistedRunRecord {
            run_id: self.id.clone(),
            company_name: self.company_name.clone(),
            status: self.status,
            attempts: self.attempts,
            summary: self.summary.clone(),
            events: self.events.snapshot(),
            error: self.error.clone(),
            artifacts: self.artifact_names(),
            created_at: Some(self.created_at),
            completed_at: self.completed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// A set of field changes applied atomically by [`RunRegistry::update`].
#[derive(Debug, Default, Clone)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    /// Increment the attempt counter.
    pub begin_attempt: bool,
    pub summary: Option<Summary>,
    pub artifacts: Option<Artifacts>,
    /// `Some(None)` clears the error.
    pub error: Option<Option<String>>,
    pub completed_at: Option<Timestamp>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn begin_attempt(mut self) -> Self {
        self.begin_attempt = true;
        self
    }

    pub fn summary(mut self, summary: Summary) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn artifacts(mut self, artifacts: Artifacts) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn completed_at(mut self, at: Timestamp) -> Self {
        self.completed_at = Some(at);
        self
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, Run>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh Queued run.
    pub async fn create(&self, company_name: impl Into<String>) -> Run {
        let run = Run::new(company_name.into());
        self.runs.write().await.insert(run.id.clone(), run.clone());
        run
    }

    pub async fn get(&self, id: &RunId) -> Option<Run> {
        self.runs.read().await.get(id).cloned()
    }

    /// Event log of a run, without copying the rest of the record.
    pub async fn events_of(&self, id: &RunId) -> Option<Arc<EventLog>> {
        self.runs.read().await.get(id).map(|r| Arc::clone(&r.events))
    }

    pub async fn status_of(&self, id: &RunId) -> Option<RunStatus> {
        self.runs.read().await.get(id).map(|r| r.status)
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply `update` to a run and return the updated record.
    ///
    /// Returns `Ok(None)` when the run is unknown. A status change that the
    /// state machine does not allow is rejected with `CoreError::Conflict`
    /// and nothing is applied.
    pub async fn update(&self, id: &RunId, update: RunUpdate) -> Result<Option<Run>, CoreError> {
        let mut runs = self.runs.write().await;
        let Some(run) = runs.get_mut(id) else {
            return Ok(None);
        };

        if let Some(next) = update.status {
            run.status
                .validate_transition(next)
                .map_err(CoreError::Conflict)?;
            run.status = next;
        }
        if update.begin_attempt {
            run.attempts += 1;
        }
        if let Some(summary) = update.summary {
            run.summary = summary;
        }
        if let Some(artifacts) = update.artifacts {
            run.artifacts = artifacts;
        }
        if let Some(error) = update.error {
            run.error = error;
        }
        if let Some(at) = update.completed_at {
            run.completed_at = Some(at);
        }

        if update.status.is_some() {
            run.events.notify();
        }
        Ok(Some(run.clone()))
    }
}
