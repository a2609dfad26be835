//! Worker tasks draining the job queue.
//!
//! Each worker loops: dequeue a run id, mark it Running, execute one
//! pipeline attempt on the blocking pool, commit the outcome to the
//! registry in a single update, persist the snapshot, then either finish
//! the run or sleep out the backoff and re-enqueue it. The backoff sleep
//! occupies the worker. Shutdown during the sleep fails the run.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use valuo_core::run::RunStatus;
use valuo_core::types::RunId;
use valuo_events::{EventBus, RunNotice};
use valuo_pipeline::{AttemptOutput, PipelineRunner};
use valuo_storage::RunStore;

use crate::queue::{JobQueue, QueueError};
use crate::registry::{Run, RunRegistry, RunUpdate};
use crate::retry::{sleep_or_cancel, RetryController, RetryDecision};

/// Everything a worker needs, shared by all workers.
pub(crate) struct WorkerContext {
    pub registry: Arc<RunRegistry>,
    pub queue: JobQueue,
    pub retry: Arc<RetryController>,
    pub runner: Arc<PipelineRunner>,
    pub store: Arc<RunStore>,
    pub bus: Arc<EventBus>,
    pub cancel: CancellationToken,
}

/// Handles of the spawned worker tasks.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(count: usize, ctx: Arc<WorkerContext>) -> Self {
        let handles = (0..count.max(1))
            .map(|worker| tokio::spawn(worker_loop(worker, Arc::clone(&ctx))))
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    }
}

async fn worker_loop(worker: usize, ctx: Arc<WorkerContext>) {
    tracing::debug!(worker, "Worker started");
    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            next = ctx.queue.dequeue() => next,
        };
        let Some(run_id) = next else {
            break;
        };
        process(worker, &ctx, run_id).await;
    }
    tracing::debug!(worker, "Worker stopped");
}

/// Run one attempt of `run_id` and drive whatever follows it.
async fn process(worker: usize, ctx: &WorkerContext, run_id: RunId) {
    let run = match ctx
        .registry
        .update(&run_id, RunUpdate::status(RunStatus::Running).begin_attempt())
        .await
    {
        Ok(Some(run)) => run,
        Ok(None) => {
            tracing::warn!(worker, run_id = %run_id, "Dequeued unknown run");
            return;
        }
        Err(e) => {
            tracing::warn!(worker, run_id = %run_id, error = %e, "Skipping run in unexpected state");
            return;
        }
    };
    tracing::info!(worker, run_id = %run_id, attempt = run.attempts, "Run attempt started");
    ctx.bus
        .publish(RunNotice::new(run_id.clone(), RunStatus::Running, run.attempts));

    match execute_attempt(ctx, &run).await {
        Ok(output) => complete(ctx, &run, output).await,
        Err(message) => fail(worker, ctx, &run, message).await,
    }
}

/// Execute the pipeline off the async executor.
async fn execute_attempt(ctx: &WorkerContext, run: &Run) -> Result<AttemptOutput, String> {
    let runner = Arc::clone(&ctx.runner);
    let log = Arc::clone(&run.events);
    let id = run.id.clone();
    let company = run.company_name.clone();

    match tokio::task::spawn_blocking(move || runner.run(&id, &company, &log)).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("pipeline attempt aborted: {e}")),
    }
}

async fn complete(ctx: &WorkerContext, run: &Run, output: AttemptOutput) {
    ctx.retry.clear(&run.id).await;
    let update = RunUpdate::status(RunStatus::Completed)
        .summary(output.summary)
        .artifacts(output.artifacts)
        .error(None)
        .completed_at(chrono::Utc::now());

    if let Some(done) = commit(ctx, &run.id, update).await {
        tracing::info!(run_id = %done.id, attempt = done.attempts, "Run completed");
        persist(ctx, &done).await;
        ctx.bus
            .publish(RunNotice::new(done.id.clone(), done.status, done.attempts));
    }
}

async fn fail(worker: usize, ctx: &WorkerContext, run: &Run, message: String) {
    match ctx.retry.on_failure(&run.id).await {
        RetryDecision::Retry { retry, delay } => {
            let update = RunUpdate::status(RunStatus::Retrying).error(Some(message.clone()));
            let Some(retrying) = commit(ctx, &run.id, update).await else {
                return;
            };
            tracing::warn!(
                worker,
                run_id = %run.id,
                attempt = retrying.attempts,
                retry,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Run attempt failed, retrying",
            );
            persist(ctx, &retrying).await;
            ctx.bus.publish(
                RunNotice::new(run.id.clone(), RunStatus::Retrying, retrying.attempts)
                    .with_error(message.clone()),
            );

            if !sleep_or_cancel(delay, &ctx.cancel).await {
                abandon(ctx, &run.id, &message).await;
                return;
            }
            requeue(ctx, &run.id).await;
        }
        RetryDecision::Exhausted => {
            let update = RunUpdate::status(RunStatus::Failed)
                .error(Some(message.clone()))
                .completed_at(chrono::Utc::now());
            let Some(failed) = commit(ctx, &run.id, update).await else {
                return;
            };
            tracing::warn!(
                worker,
                run_id = %run.id,
                attempt = failed.attempts,
                error = %message,
                "Run failed, retries exhausted",
            );
            persist(ctx, &failed).await;
            ctx.bus.publish(
                RunNotice::new(run.id.clone(), RunStatus::Failed, failed.attempts)
                    .with_error(message),
            );
        }
    }
}

/// Fail a run whose backoff was cut short by shutdown, so no run is left
/// in `retrying` with nobody to retry it.
async fn abandon(ctx: &WorkerContext, run_id: &RunId, last_error: &str) {
    ctx.retry.clear(run_id).await;
    let message = format!("Retry abandoned on shutdown: {last_error}");
    let update = RunUpdate::status(RunStatus::Failed)
        .error(Some(message.clone()))
        .completed_at(chrono::Utc::now());
    let Some(failed) = commit(ctx, run_id, update).await else {
        return;
    };
    tracing::info!(run_id = %run_id, attempt = failed.attempts, "Retry abandoned on shutdown");
    persist(ctx, &failed).await;
    ctx.bus.publish(
        RunNotice::new(run_id.clone(), RunStatus::Failed, failed.attempts).with_error(message),
    );
}

/// Move a retrying run back to Queued and hand it to the queue.
///
/// A full queue never blocks the worker: the send moves to a detached task.
async fn requeue(ctx: &WorkerContext, run_id: &RunId) {
    let Some(queued) = commit(ctx, run_id, RunUpdate::status(RunStatus::Queued)).await else {
        return;
    };
    ctx.bus
        .publish(RunNotice::new(run_id.clone(), RunStatus::Queued, queued.attempts));

    match ctx.queue.try_enqueue(run_id.clone()) {
        Ok(()) => {}
        Err((QueueError::Full, id)) => {
            tracing::debug!(run_id = %id, "Queue full, deferring re-enqueue");
            let queue = ctx.queue.clone();
            tokio::spawn(async move {
                if let Err(e) = queue.enqueue(id.clone()).await {
                    tracing::error!(run_id = %id, error = %e, "Failed to re-enqueue run");
                }
            });
        }
        Err((e, id)) => {
            tracing::error!(run_id = %id, error = %e, "Failed to re-enqueue run");
        }
    }
}

async fn commit(ctx: &WorkerContext, run_id: &RunId, update: RunUpdate) -> Option<Run> {
    match ctx.registry.update(run_id, update).await {
        Ok(run) => run,
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "Failed to commit run update");
            None
        }
    }
}

/// Persistence failures are logged and never change the run.
async fn persist(ctx: &WorkerContext, run: &Run) {
    if let Err(e) = ctx.store.persist(&run.to_record(), &run.artifacts).await {
        tracing::error!(run_id = %run.id, error = %e, "Failed to persist run");
    }
}
