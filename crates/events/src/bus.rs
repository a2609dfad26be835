//! In-process lifecycle bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out a [`RunNotice`] every time a run changes status.
//! It is designed to be shared via `Arc<EventBus>` across the application.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use valuo_core::run::RunStatus;
use valuo_core::types::RunId;

// ---------------------------------------------------------------------------
// RunNotice
// ---------------------------------------------------------------------------

/// A run status change.
#[derive(Debug, Clone, Serialize)]
pub struct RunNotice {
    pub run_id: RunId,
    pub status: RunStatus,

    /// Attempts started so far, including the current one.
    pub attempts: u32,

    /// Error message of the latest failed attempt, if any.
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl RunNotice {
    pub fn new(run_id: RunId, status: RunStatus, attempts: u32) -> Self {
        Self {
            run_id,
            status,
            attempts,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out notice bus.
///
/// ```rust
/// use valuo_core::run::RunStatus;
/// use valuo_events::{EventBus, RunNotice};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(RunNotice::new("r_1".into(), RunStatus::Queued, 0));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<RunNotice>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed notices are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a notice to all current subscribers.
    pub fn publish(&self, notice: RunNotice) {
        // Only fails when there are zero receivers.
        let _ = self.sender.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunNotice> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn multiple_subscribers_receive_same_notice() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(RunNotice::new("r_a".into(), RunStatus::Running, 1));

        let n1 = rx1.recv().await.expect("subscriber 1 should receive");
        let n2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(n1.run_id.as_str(), "r_a");
        assert_eq!(n2.status, RunStatus::Running);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(RunNotice::new("r_orphan".into(), RunStatus::Queued, 0));
    }

    #[test]
    fn notice_serializes_status_lowercase() {
        let notice =
            RunNotice::new("r_b".into(), RunStatus::Retrying, 1).with_error("No entity candidates found");
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["status"], "retrying");
        assert_eq!(json["run_id"], "r_b");
        assert_eq!(json["error"], "No entity candidates found");
    }
}
