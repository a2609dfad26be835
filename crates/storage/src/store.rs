//! Filesystem-backed [`RunStore`].
//!
//! Layout:
//!
//! ```text
//! <root>/
//!   <run_id>/
//!     run.json            snapshot (PersistedRunRecord)
//!     dcf.csv             artifacts, verbatim
//!     ...
//! ```

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use valuo_core::run::Artifacts;
use valuo_core::types::RunId;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::StorageError;
use crate::record::{PersistedRunRecord, RunIndexEntry};

/// Name of the per-run metadata snapshot. Never included in bundles.
pub const RUN_SNAPSHOT_FILE: &str = "run.json";

/// Extension used while a snapshot is being written.
const TMP_SUFFIX: &str = ".tmp";

/// Whether `name` is usable as a single file name inside a run directory.
pub fn is_safe_artifact_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, id: &RunId) -> Result<PathBuf, StorageError> {
        if !id.is_path_safe() {
            return Err(StorageError::NotFound(format!("run {id}")));
        }
        Ok(self.root.join(id.as_str()))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write every artifact and the snapshot for one run, replacing whatever
    /// a previous attempt left behind.
    ///
    /// Files in the run directory that are neither listed artifacts nor the
    /// snapshot are removed, so the directory always mirrors `record`.
    pub async fn persist(
        &self,
        record: &PersistedRunRecord,
        artifacts: &Artifacts,
    ) -> Result<(), StorageError> {
        let dir = self.run_dir(&record.run_id)?;
        tokio::fs::create_dir_all(&dir).await?;

        for (name, content) in artifacts {
            if !is_safe_artifact_name(name) || name == RUN_SNAPSHOT_FILE {
                tracing::warn!(run_id = %record.run_id, name = %name, "Skipping unsafe artifact name");
                continue;
            }
            tokio::fs::write(dir.join(name), content.as_bytes()).await?;
        }

        let snapshot = serde_json::to_vec_pretty(record)?;
        let tmp = dir.join(format!("{RUN_SNAPSHOT_FILE}{TMP_SUFFIX}"));
        tokio::fs::write(&tmp, &snapshot).await?;
        tokio::fs::rename(&tmp, dir.join(RUN_SNAPSHOT_FILE)).await?;

        let keep: HashSet<&str> = artifacts
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(RUN_SNAPSHOT_FILE))
            .collect();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !keep.contains(name.as_str()) && entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }

        tracing::debug!(
            run_id = %record.run_id,
            status = %record.status,
            artifacts = artifacts.len(),
            "Run snapshot persisted",
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Load the snapshot of one run.
    pub async fn load(&self, id: &RunId) -> Result<PersistedRunRecord, StorageError> {
        let path = self.run_dir(id)?.join(RUN_SNAPSHOT_FILE);
        let bytes = read_or_not_found(&path, || format!("run {id}")).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Raw bytes of one persisted artifact.
    pub async fn read_artifact(&self, id: &RunId, name: &str) -> Result<Vec<u8>, StorageError> {
        if !is_safe_artifact_name(name) || name == RUN_SNAPSHOT_FILE {
            return Err(StorageError::NotFound(format!("artifact {name}")));
        }
        let path = self.run_dir(id)?.join(name);
        read_or_not_found(&path, || format!("artifact {name} of run {id}")).await
    }

    /// Index of every persisted run, newest completion first.
    ///
    /// Directories without a readable snapshot are skipped. A missing root
    /// yields an empty index.
    pub async fn list(&self) -> Result<Vec<RunIndexEntry>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut index = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path().join(RUN_SNAPSHOT_FILE);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Unreadable run snapshot");
                    continue;
                }
            };
            match serde_json::from_slice::<PersistedRunRecord>(&bytes) {
                Ok(record) => index.push(record.index_entry()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Corrupt run snapshot");
                }
            }
        }

        // `None` sorts lowest, so runs without a completion time come last.
        index.sort_by(|a, b| {
            b.completed_at
                .cmp(&a.completed_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(index)
    }

    /// Zip every file in the run directory except the snapshot.
    pub async fn bundle(&self, id: &RunId) -> Result<Vec<u8>, StorageError> {
        let dir = self.run_dir(id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(format!("run {id}")));
            }
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<(String, Vec<u8>)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == RUN_SNAPSHOT_FILE
                || name.ends_with(TMP_SUFFIX)
                || !entry.file_type().await?.is_file()
            {
                continue;
            }
            files.push((name, tokio::fs::read(entry.path()).await?));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in files {
            writer.start_file(name, options)?;
            writer.write_all(&bytes)?;
        }
        Ok(writer.finish()?.into_inner())
    }
}

async fn read_or_not_found(
    path: &Path,
    what: impl FnOnce() -> String,
) -> Result<Vec<u8>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(what())),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use assert_matches::assert_matches;
    use chrono::{Duration, Utc};
    use valuo_core::run::{RunEvent, RunStatus, Stage, Summary};

    use super::*;

    fn record(id: &str, status: RunStatus, artifacts: &Artifacts) -> PersistedRunRecord {
        PersistedRunRecord {
            run_id: RunId::from(id),
            company_name: "Apple".into(),
            status,
            attempts: 1,
            summary: Summary::from([("ev".to_string(), 1234.5)]),
            events: vec![RunEvent::new(Stage::Resolve, "Resolving")],
            error: None,
            artifacts: artifacts.keys().cloned().collect(),
            created_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        }
    }

    fn artifacts() -> Artifacts {
        Artifacts::from([
            ("dcf.csv".to_string(), "period_end\nT+1\n".to_string()),
            ("assumptions.md".to_string(), "# Assumptions\n".to_string()),
        ])
    }

    async fn dir_names(path: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(path).await.unwrap();
        while let Some(e) = entries.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().to_string());
        }
        names.sort();
        names
    }

    // -----------------------------------------------------------------------
    // persist / load
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn persist_writes_artifacts_and_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        let arts = artifacts();
        let rec = record("r_one", RunStatus::Completed, &arts);

        store.persist(&rec, &arts).await.unwrap();

        assert_eq!(
            dir_names(&tmp.path().join("r_one")).await,
            vec!["assumptions.md", "dcf.csv", "run.json"]
        );
        assert_eq!(store.load(&rec.run_id).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn later_attempt_overwrites_and_prunes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        let arts = artifacts();
        store
            .persist(&record("r_two", RunStatus::Completed, &arts), &arts)
            .await
            .unwrap();

        let failed = PersistedRunRecord {
            error: Some("boom".into()),
            ..record("r_two", RunStatus::Failed, &Artifacts::new())
        };
        store.persist(&failed, &Artifacts::new()).await.unwrap();

        assert_eq!(dir_names(&tmp.path().join("r_two")).await, vec!["run.json"]);
        let loaded = store.load(&RunId::from("r_two")).await.unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn load_unknown_run_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        assert_matches!(
            store.load(&RunId::from("r_missing")).await,
            Err(StorageError::NotFound(_))
        );
        assert_matches!(
            store.load(&RunId::from("../etc")).await,
            Err(StorageError::NotFound(_))
        );
    }

    // -----------------------------------------------------------------------
    // read_artifact
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn read_artifact_rejects_traversal_and_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        let arts = artifacts();
        let rec = record("r_art", RunStatus::Completed, &arts);
        store.persist(&rec, &arts).await.unwrap();

        let body = store.read_artifact(&rec.run_id, "dcf.csv").await.unwrap();
        assert_eq!(body, b"period_end\nT+1\n");

        for bad in ["../r_art/dcf.csv", "..", "a/b", "run.json", "missing.csv"] {
            assert_matches!(
                store.read_artifact(&rec.run_id, bad).await,
                Err(StorageError::NotFound(_)),
                "{bad} should be rejected"
            );
        }
    }

    // -----------------------------------------------------------------------
    // list
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn list_orders_newest_completion_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        let arts = artifacts();

        let mut older = record("r_old", RunStatus::Completed, &arts);
        older.completed_at = Some(Utc::now() - Duration::minutes(5));
        let newer = record("r_new", RunStatus::Failed, &Artifacts::new());
        store.persist(&older, &arts).await.unwrap();
        store.persist(&newer, &Artifacts::new()).await.unwrap();
        tokio::fs::create_dir_all(tmp.path().join("stray")).await.unwrap();

        let index = store.list().await.unwrap();
        let ids: Vec<&str> = index.iter().map(|e| e.run_id.as_str()).collect();
        assert_eq!(ids, vec!["r_new", "r_old"]);
        assert_eq!(index[1].artifacts, vec!["assumptions.md", "dcf.csv"]);
        assert_eq!(index[1].summary["ev"], 1234.5);
    }

    #[tokio::test]
    async fn list_on_missing_root_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // bundle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn bundle_contains_artifacts_without_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        let arts = artifacts();
        let rec = record("r_zip", RunStatus::Completed, &arts);
        store.persist(&rec, &arts).await.unwrap();

        let bytes = store.bundle(&rec.run_id).await.unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.by_name(RUN_SNAPSHOT_FILE).is_err());

        let mut content = String::new();
        archive
            .by_name("dcf.csv")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "period_end\nT+1\n");
    }

    #[tokio::test]
    async fn bundle_of_unknown_run_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());
        assert_matches!(
            store.bundle(&RunId::from("r_none")).await,
            Err(StorageError::NotFound(_))
        );
    }
}
