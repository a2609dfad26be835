//! Durable run storage.
//!
//! One directory per run under a configurable root, holding every artifact
//! verbatim plus a `run.json` snapshot. Snapshots are rewritten after each
//! attempt and are the only source for the run index after a restart.

pub mod error;
pub mod record;
pub mod store;

pub use error::StorageError;
pub use record::{PersistedRunRecord, RunIndexEntry};
pub use store::{is_safe_artifact_name, RunStore, RUN_SNAPSHOT_FILE};
