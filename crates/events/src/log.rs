//! Append-only per-run event log.
//!
//! The log is shared as `Arc<EventLog>` between the run registry, the
//! pipeline attempt writing it, and any number of live readers. Appends are
//! synchronous (the pipeline runs on a blocking thread); readers are woken
//! through a `tokio::sync::watch` channel carrying the current length.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use valuo_core::run::{RunEvent, Stage};

pub struct EventLog {
    events: RwLock<Vec<RunEvent>>,
    len_tx: watch::Sender<usize>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::from_events(Vec::new())
    }

    /// Rebuild a log from previously recorded events.
    pub fn from_events(events: Vec<RunEvent>) -> Self {
        let (len_tx, _) = watch::channel(events.len());
        Self {
            events: RwLock::new(events),
            len_tx,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<RunEvent>> {
        // A panic while holding the lock cannot leave a half-pushed Vec.
        self.events.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<RunEvent>> {
        self.events.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event and wake live readers.
    pub fn append(&self, event: RunEvent) {
        let len = {
            let mut events = self.write();
            events.push(event);
            events.len()
        };
        self.len_tx.send_replace(len);
    }

    /// Convenience for `append(RunEvent::new(stage, message))`.
    pub fn record(&self, stage: Stage, message: impl Into<String>) {
        self.append(RunEvent::new(stage, message));
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every event recorded so far.
    pub fn snapshot(&self) -> Vec<RunEvent> {
        self.read().clone()
    }

    /// Events from index `from` onwards. Out-of-range yields an empty Vec.
    pub fn since(&self, from: usize) -> Vec<RunEvent> {
        self.read().get(from..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub fn last(&self) -> Option<RunEvent> {
        self.read().last().cloned()
    }

    /// Receiver that changes whenever an event is appended or [`notify`]
    /// is called.
    ///
    /// [`notify`]: EventLog::notify
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.len_tx.subscribe()
    }

    /// Wake live readers without appending, e.g. after the owning run
    /// changed status.
    pub fn notify(&self) {
        self.len_tx.send_modify(|_| {});
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
