//! Bounded FIFO of run ids between ingress and workers.
//!
//! Backed by a `tokio::sync::mpsc` channel. Workers share the receiver
//! behind a mutex, so each id is delivered to exactly one worker.
//!
//! Reserved but unfilled slots count against capacity but not against
//! [`JobQueue::len`], which only counts ids actually waiting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use valuo_core::types::RunId;

/// Default queue bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// No slot became free within the submit timeout.
    #[error("Job queue is full")]
    Full,

    #[error("Job queue is closed")]
    Closed,
}

/// A reserved queue slot. Dropping it without [`enqueue`](Self::enqueue)
/// releases the slot.
#[derive(Debug)]
pub struct QueueSlot<'a> {
    permit: mpsc::Permit<'a, RunId>,
    waiting: &'a AtomicUsize,
}

impl QueueSlot<'_> {
    /// Fill the reserved slot. Never blocks and never fails.
    pub fn enqueue(self, id: RunId) {
        // Count before sending so a fast dequeue never sees the counter at zero.
        self.waiting.fetch_add(1, Ordering::SeqCst);
        self.permit.send(id);
    }
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<RunId>,
    rx: Arc<Mutex<mpsc::Receiver<RunId>>>,
    waiting: Arc<AtomicUsize>,
    submit_timeout: Duration,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` ids (minimum 1).
    pub fn new(capacity: usize, submit_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            waiting: Arc::new(AtomicUsize::new(0)),
            submit_timeout,
        }
    }

    /// Wait up to the submit timeout for a free slot.
    pub async fn reserve(&self) -> Result<QueueSlot<'_>, QueueError> {
        match tokio::time::timeout(self.submit_timeout, self.tx.reserve()).await {
            Ok(Ok(permit)) => Ok(self.slot(permit)),
            Ok(Err(_)) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::Full),
        }
    }

    /// Enqueue, waiting as long as it takes for a free slot.
    pub async fn enqueue(&self, id: RunId) -> Result<(), QueueError> {
        let permit = self.tx.reserve().await.map_err(|_| QueueError::Closed)?;
        self.slot(permit).enqueue(id);
        Ok(())
    }

    /// Enqueue without waiting. On failure the id is handed back.
    pub fn try_enqueue(&self, id: RunId) -> Result<(), (QueueError, RunId)> {
        match self.tx.try_reserve() {
            Ok(permit) => {
                self.slot(permit).enqueue(id);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(())) => Err((QueueError::Full, id)),
            Err(mpsc::error::TrySendError::Closed(())) => Err((QueueError::Closed, id)),
        }
    }

    /// Wait for the next id. `None` once every sender is gone.
    pub async fn dequeue(&self) -> Option<RunId> {
        let id = self.rx.lock().await.recv().await?;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        Some(id)
    }

    /// Number of ids currently waiting. Reserved slots are not counted.
    pub fn len(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    fn slot<'a>(&'a self, permit: mpsc::Permit<'a, RunId>) -> QueueSlot<'a> {
        QueueSlot {
            permit,
            waiting: &self.waiting,
        }
    }
}
