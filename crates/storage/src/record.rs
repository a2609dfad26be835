use serde::{Deserialize, Serialize};
use valuo_core::run::{RunEvent, RunStatus, Summary};
use valuo_core::types::{RunId, Timestamp};

/// On-disk mirror of a run, stored as `run.json` in the run directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRunRecord {
    pub run_id: RunId,
    pub company_name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub events: Vec<RunEvent>,
    pub error: Option<String>,
    /// File names of the artifacts stored next to this snapshot.
    #[serde(default)]
    pub artifacts: Vec<String>,
    pub created_at: Option<Timestamp>,
    /// End of the attempt that produced this snapshot.
    pub completed_at: Option<Timestamp>,
}

impl PersistedRunRecord {
    pub fn index_entry(&self) -> RunIndexEntry {
        RunIndexEntry {
            run_id: self.run_id.clone(),
            status: self.status,
            summary: self.summary.clone(),
            artifacts: self.artifacts.clone(),
            completed_at: self.completed_at,
        }
    }
}

/// One row of the persisted run index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunIndexEntry {
    pub run_id: RunId,
    pub status: RunStatus,
    pub summary: Summary,
    pub artifacts: Vec<String>,
    pub completed_at: Option<Timestamp>,
}
