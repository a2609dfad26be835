//! Run lifecycle types: status state machine, pipeline stages, and events.
//!
//! This module lives in `core` (zero internal deps) so the pipeline, the
//! worker pool, the storage layer, and the HTTP surface all agree on the
//! same vocabulary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Externally visible status of a run.
///
/// `Retrying` is the state a run sits in while its worker waits out the
/// backoff delay before re-enqueueing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Retrying,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Retrying => "retrying",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Completed and Failed runs never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Returns the set of statuses reachable from `self`.
    pub fn valid_transitions(self) -> &'static [RunStatus] {
        match self {
            RunStatus::Queued => &[RunStatus::Running],
            RunStatus::Running => &[
                RunStatus::Completed,
                RunStatus::Failed,
                RunStatus::Retrying,
            ],
            // Failed when shutdown abandons the pending retry.
            RunStatus::Retrying => &[RunStatus::Queued, RunStatus::Failed],
            RunStatus::Completed | RunStatus::Failed => &[],
        }
    }

    pub fn can_transition_to(self, to: RunStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a state transition, returning an error message for invalid ones.
    pub fn validate_transition(self, to: RunStatus) -> Result<(), String> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(format!("Invalid transition: {self} -> {to}"))
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stages and events
// ---------------------------------------------------------------------------

/// Named phase recorded in a run's event log.
///
/// `Done` and `Error` are the terminal markers of a successful and a failed
/// attempt respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Resolve,
    Ingest,
    Map,
    Forecast,
    #[serde(rename = "DCF")]
    Dcf,
    Export,
    Done,
    Error,
}

impl Stage {
    /// The stages of a successful attempt, in order.
    pub const SUCCESS_SEQUENCE: [Stage; 7] = [
        Stage::Resolve,
        Stage::Ingest,
        Stage::Map,
        Stage::Forecast,
        Stage::Dcf,
        Stage::Export,
        Stage::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Resolve => "Resolve",
            Stage::Ingest => "Ingest",
            Stage::Map => "Map",
            Stage::Forecast => "Forecast",
            Stage::Dcf => "DCF",
            Stage::Export => "Export",
            Stage::Done => "Done",
            Stage::Error => "Error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped entry of a run's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub stage: Stage,
    pub message: String,
    pub ts: Timestamp,
}

impl RunEvent {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            ts: chrono::Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Headline metrics of a completed run, keyed by metric name.
pub type Summary = BTreeMap<String, f64>;

/// Artifact file contents keyed by file name.
pub type Artifacts = BTreeMap<String, String>;

/// Metric names recorded in every successful run's [`Summary`].
pub mod metrics {
    pub const EV: &str = "ev";
    pub const EQUITY_VALUE: &str = "equity_value";
    pub const WACC: &str = "wacc";
    pub const TERMINAL_GROWTH: &str = "g";
}
