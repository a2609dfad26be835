//! Explicitly constructed owner of the run engine.
//!
//! [`Orchestrator::start`] spawns the worker pool and returns a shared
//! handle that is safe to clone into Axum state. Nothing starts implicitly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use valuo_core::run::RunStatus;
use valuo_core::types::RunId;
use valuo_events::{EventBus, RunNotice};
use valuo_pipeline::PipelineRunner;
use valuo_storage::RunStore;

use crate::pool::{WorkerContext, WorkerPool};
use crate::queue::{JobQueue, QueueError, DEFAULT_QUEUE_CAPACITY};
use crate::registry::{Run, RunRegistry};
use crate::retry::{RetryController, RetryPolicy};

/// How long [`Orchestrator::shutdown`] waits for workers to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Longest a submission waits for a free queue slot.
    pub submit_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            submit_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Orchestrator {
    registry: Arc<RunRegistry>,
    queue: JobQueue,
    store: Arc<RunStore>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    workers: Mutex<Option<WorkerPool>>,
}

impl Orchestrator {
    /// Spawn the worker pool. Must be called from within a Tokio runtime.
    pub fn start(config: OrchestratorConfig, runner: PipelineRunner, store: RunStore) -> Arc<Self> {
        let registry = Arc::new(RunRegistry::new());
        let queue = JobQueue::new(config.queue_capacity, config.submit_timeout);
        let store = Arc::new(store);
        let bus = Arc::new(EventBus::default());
        let cancel = CancellationToken::new();

        let ctx = Arc::new(WorkerContext {
            registry: Arc::clone(&registry),
            queue: queue.clone(),
            retry: Arc::new(RetryController::new(config.retry)),
            runner: Arc::new(runner),
            store: Arc::clone(&store),
            bus: Arc::clone(&bus),
            cancel: cancel.clone(),
        });
        let pool = WorkerPool::spawn(config.worker_count, ctx);

        tracing::info!(
            workers = pool.len(),
            queue_capacity = queue.max_capacity(),
            max_retries = config.retry.max_retries,
            backoff_base_ms = config.retry.backoff_base.as_millis() as u64,
            "Orchestrator started",
        );

        Arc::new(Self {
            registry,
            queue,
            store,
            bus,
            cancel,
            workers: Mutex::new(Some(pool)),
        })
    }

    /// Create a Queued run and enqueue it.
    ///
    /// The queue slot is reserved first, so a submission that times out
    /// waiting for space leaves no run behind.
    pub async fn submit(&self, company_name: &str) -> Result<Run, QueueError> {
        let slot = self.queue.reserve().await.map_err(|e| {
            tracing::warn!(error = %e, "Run submission rejected");
            e
        })?;
        let run = self.registry.create(company_name).await;
        slot.enqueue(run.id.clone());

        tracing::info!(run_id = %run.id, company = %run.company_name, "Run queued");
        self.bus
            .publish(RunNotice::new(run.id.clone(), RunStatus::Queued, 0));
        Ok(run)
    }

    pub async fn get(&self, id: &RunId) -> Option<Run> {
        self.registry.get(id).await
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Subscribe to run status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<RunNotice> {
        self.bus.subscribe()
    }

    /// Stop taking work and wait for the workers to exit.
    ///
    /// In-flight attempts finish; pending backoff sleeps are cut short.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down orchestrator");
        self.cancel.cancel();

        if let Some(pool) = self.workers.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, pool.join()).await.is_err() {
                tracing::warn!("Workers did not stop within the grace period");
            }
        }
        tracing::info!("Orchestrator shut down complete");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Condvar, Mutex as StdMutex};
    use std::time::Instant;

    use assert_matches::assert_matches;
    use valuo_core::resolver::Candidate;
    use valuo_core::run::Stage;
    use valuo_pipeline::{EntityResolver, SeedResolver};

    use super::*;

    fn config(workers: usize, max_retries: u32, base_ms: u64) -> OrchestratorConfig {
        OrchestratorConfig {
            worker_count: workers,
            queue_capacity: 8,
            submit_timeout: Duration::from_millis(200),
            retry: RetryPolicy {
                max_retries,
                backoff_base: Duration::from_millis(base_ms),
            },
        }
    }

    /// Wait until `id` reaches a terminal status.
    async fn wait_terminal(rx: &mut broadcast::Receiver<RunNotice>, id: &RunId) -> RunNotice {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let notice = rx.recv().await.expect("bus closed");
                if &notice.run_id == id && notice.status.is_terminal() {
                    return notice;
                }
            }
        })
        .await
        .expect("run should reach a terminal status")
    }

    /// Wait until `id` reaches `status`.
    async fn wait_status(
        rx: &mut broadcast::Receiver<RunNotice>,
        id: &RunId,
        status: RunStatus,
    ) -> RunNotice {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let notice = rx.recv().await.expect("bus closed");
                if &notice.run_id == id && notice.status == status {
                    return notice;
                }
            }
        })
        .await
        .expect("run should reach the status")
    }

    struct NothingResolver;

    impl EntityResolver for NothingResolver {
        fn resolve(&self, _query: &str) -> Vec<Candidate> {
            Vec::new()
        }
    }

    /// Blocks every resolution until opened.
    struct GateResolver {
        open: StdMutex<bool>,
        cv: Condvar,
    }

    impl GateResolver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                open: StdMutex::new(false),
                cv: Condvar::new(),
            })
        }

        fn release(&self) {
            *self.open.lock().unwrap() = true;
            self.cv.notify_all();
        }
    }

    impl EntityResolver for GateResolver {
        fn resolve(&self, query: &str) -> Vec<Candidate> {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cv.wait(open).unwrap();
            }
            SeedResolver::default().resolve(query)
        }
    }

    async fn dir_names(path: &std::path::Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(path).await.unwrap();
        while let Some(e) = entries.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().to_string());
        }
        names.sort();
        names
    }

    // -----------------------------------------------------------------------
    // Liveness and durability
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn successful_run_completes_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let orch = Orchestrator::start(
            config(2, 1, 10),
            PipelineRunner::new(),
            RunStore::new(tmp.path()),
        );
        let mut rx = orch.subscribe();

        let run = orch.submit("Apple").await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        let notice = wait_terminal(&mut rx, &run.id).await;
        assert_eq!(notice.status, RunStatus::Completed);

        let done = orch.get(&run.id).await.unwrap();
        assert_eq!(done.attempts, 1);
        assert!(done.error.is_none());
        assert_eq!(done.summary.len(), 4);
        let stages: Vec<Stage> = done.events.snapshot().iter().map(|e| e.stage).collect();
        assert_eq!(stages, Stage::SUCCESS_SEQUENCE.to_vec());

        let mut expected = done.artifact_names();
        expected.push("run.json".to_string());
        expected.sort();
        assert_eq!(dir_names(&tmp.path().join(run.id.as_str())).await, expected);

        let record = orch.store().load(&run.id).await.unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.events.len(), 7);

        orch.shutdown().await;
    }

    #[tokio::test]
    async fn many_runs_all_terminate() {
        let tmp = tempfile::tempdir().unwrap();
        let orch = Orchestrator::start(
            config(3, 1, 5),
            PipelineRunner::new(),
            RunStore::new(tmp.path()),
        );

        // Terminal notices go out after the snapshot is written, so once every
        // one has arrived the store holds every run.
        let mut rx = orch.subscribe();
        let mut ids = Vec::new();
        for name in ["Apple", "Google", "MSFT", "Infosys", "Apple Inc."] {
            ids.push(orch.submit(name).await.unwrap().id);
        }
        let mut finished = std::collections::HashSet::new();
        while finished.len() < ids.len() {
            let notice = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("runs should terminate")
                .expect("bus closed");
            if notice.status.is_terminal() {
                finished.insert(notice.run_id);
            }
        }

        for id in &ids {
            assert!(finished.contains(id));
            assert_eq!(orch.get(id).await.unwrap().status, RunStatus::Completed);
        }
        assert_eq!(orch.store().list().await.unwrap().len(), ids.len());
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn persistence_failure_keeps_completed_status() {
        let tmp = tempfile::tempdir().unwrap();
        // A regular file where the store root should be makes every write fail.
        let root = tmp.path().join("not-a-dir");
        std::fs::write(&root, b"occupied").unwrap();
        let orch = Orchestrator::start(
            config(1, 1, 10),
            PipelineRunner::new(),
            RunStore::new(root.clone()),
        );
        let mut rx = orch.subscribe();

        let run = orch.submit("Apple").await.unwrap();
        let notice = wait_terminal(&mut rx, &run.id).await;
        assert_eq!(notice.status, RunStatus::Completed);

        let done = orch.get(&run.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.attempts, 1);
        assert!(done.error.is_none());
        assert_eq!(done.artifacts.len(), 5);
        assert!(orch.store().load(&run.id).await.is_err());
        orch.shutdown().await;
    }

    // -----------------------------------------------------------------------
    // Retry
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn failing_run_stops_after_retry_budget() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::new().with_resolver(Arc::new(NothingResolver));
        let orch = Orchestrator::start(config(1, 2, 20), runner, RunStore::new(tmp.path()));
        let mut rx = orch.subscribe();

        let started = Instant::now();
        let run = orch.submit("Nobody").await.unwrap();
        let notice = wait_terminal(&mut rx, &run.id).await;
        let elapsed = started.elapsed();

        assert_eq!(notice.status, RunStatus::Failed);
        assert_eq!(notice.attempts, 3);
        // 20ms after the first failure, 40ms after the second.
        assert!(elapsed >= Duration::from_millis(60), "elapsed {elapsed:?}");

        let failed = orch.get(&run.id).await.unwrap();
        assert_eq!(failed.attempts, 3);
        assert!(failed.artifacts.is_empty());
        assert!(failed.completed_at.is_some());
        assert!(failed.error.as_deref().unwrap().contains("No entity candidates"));

        let events = failed.events.snapshot();
        let errors = events.iter().filter(|e| e.stage == Stage::Error).count();
        assert_eq!(errors, 3);
        assert_eq!(events.len(), 6);

        assert_eq!(
            dir_names(&tmp.path().join(run.id.as_str())).await,
            vec!["run.json"]
        );
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn retrying_status_is_visible_between_attempts() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::new().with_resolver(Arc::new(NothingResolver));
        let orch = Orchestrator::start(config(1, 1, 200), runner, RunStore::new(tmp.path()));
        let mut rx = orch.subscribe();

        let run = orch.submit("Nobody").await.unwrap();
        let retrying = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let n = rx.recv().await.unwrap();
                if n.status == RunStatus::Retrying {
                    return n;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(retrying.attempts, 1);
        assert!(retrying.error.is_some());

        let snapshot = orch.get(&run.id).await.unwrap();
        assert_eq!(snapshot.status, RunStatus::Retrying);
        assert!(snapshot.error.is_some());
        let persisted = orch.store().load(&run.id).await.unwrap();
        assert_eq!(persisted.status, RunStatus::Retrying);

        wait_terminal(&mut rx, &run.id).await;
        orch.shutdown().await;
    }

    // -----------------------------------------------------------------------
    // Backpressure
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn full_queue_rejects_without_creating_a_run() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = GateResolver::new();
        let runner = PipelineRunner::new().with_resolver(gate.clone());
        let mut cfg = config(1, 0, 10);
        cfg.queue_capacity = 1;
        cfg.submit_timeout = Duration::from_millis(100);
        let orch = Orchestrator::start(cfg, runner, RunStore::new(tmp.path()));
        let mut rx = orch.subscribe();

        // The worker blocks on `a`; `b` fills the single slot.
        let a = orch.submit("Apple").await.unwrap();
        let b = orch.submit("Google").await.unwrap();
        assert_matches!(orch.submit("Microsoft").await, Err(QueueError::Full));
        assert_eq!(orch.registry().len().await, 2);

        gate.release();
        wait_terminal(&mut rx, &a.id).await;
        let b_now = orch.get(&b.id).await.unwrap();
        if !b_now.status.is_terminal() {
            wait_terminal(&mut rx, &b.id).await;
        }
        assert_eq!(orch.get(&b.id).await.unwrap().status, RunStatus::Completed);
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn requeue_into_full_queue_still_finishes_both_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::new().with_resolver(Arc::new(NothingResolver));
        let mut cfg = config(1, 1, 200);
        cfg.queue_capacity = 1;
        let orch = Orchestrator::start(cfg, runner, RunStore::new(tmp.path()));
        let mut rx = orch.subscribe();

        // While `a` sleeps out its backoff on the only worker, `b` takes the
        // only slot, so `a` comes back to a full queue.
        let a = orch.submit("Nobody").await.unwrap();
        wait_status(&mut rx, &a.id, RunStatus::Retrying).await;
        let b = orch.submit("Nobody Else").await.unwrap();

        let mut pending = vec![a.id.clone(), b.id.clone()];
        while !pending.is_empty() {
            let notice = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("runs should terminate")
                .expect("bus closed");
            if notice.status.is_terminal() {
                pending.retain(|id| id != &notice.run_id);
            }
        }

        for id in [&a.id, &b.id] {
            let run = orch.get(id).await.unwrap();
            assert_eq!(run.status, RunStatus::Failed);
            assert_eq!(run.attempts, 2);
        }
        assert!(orch.queue().is_empty());
        orch.shutdown().await;
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn shutdown_during_backoff_fails_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::new().with_resolver(Arc::new(NothingResolver));
        let orch = Orchestrator::start(config(1, 3, 60_000), runner, RunStore::new(tmp.path()));
        let mut rx = orch.subscribe();

        let run = orch.submit("Nobody").await.unwrap();
        wait_status(&mut rx, &run.id, RunStatus::Retrying).await;

        let started = Instant::now();
        orch.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5));

        let failed = orch.get(&run.id).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.attempts, 1);
        assert!(failed.completed_at.is_some());
        let error = failed.error.as_deref().unwrap();
        assert!(error.starts_with("Retry abandoned on shutdown"), "{error}");
        assert!(error.contains("No entity candidates"), "{error}");

        let persisted = orch.store().load(&run.id).await.unwrap();
        assert_eq!(persisted.status, RunStatus::Failed);
        assert!(persisted.completed_at.is_some());

        let notice = wait_terminal(&mut rx, &run.id).await;
        assert_eq!(notice.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let orch = Orchestrator::start(
            config(2, 1, 10),
            PipelineRunner::new(),
            RunStore::new(tmp.path()),
        );
        orch.shutdown().await;
        orch.shutdown().await;
    }
}
