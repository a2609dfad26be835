//! Per-run retry bookkeeping and exponential backoff.
//!
//! A failed attempt with `attempt < max_retries` prior retries is retried
//! after `base * 2^attempt`. State is dropped once the run succeeds or its
//! retries are exhausted, so a run makes at most `max_retries + 1` attempts.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use valuo_core::types::RunId;

/// Exponent cap so large retry budgets cannot overflow the delay.
const MAX_BACKOFF_EXPONENT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// `base * 2^attempt`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_EXPONENT))
}

/// Sleep for `delay` unless `cancel` fires first. Returns `false` if
/// cancelled.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryState {
    /// Retries already granted.
    attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `delay`, then re-enqueue. `retry` is 1 for the first retry.
    Retry { retry: u32, delay: Duration },
    /// No retries left; the run fails terminally.
    Exhausted,
}

pub struct RetryController {
    policy: RetryPolicy,
    states: Mutex<HashMap<RunId, RetryState>>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Record a failed attempt and decide what happens next.
    pub async fn on_failure(&self, id: &RunId) -> RetryDecision {
        let mut states = self.states.lock().await;
        let attempt = states.get(id).map_or(0, |s| s.attempt);

        if attempt < self.policy.max_retries {
            let delay = backoff_delay(self.policy.backoff_base, attempt);
            states.insert(id.clone(), RetryState { attempt: attempt + 1 });
            RetryDecision::Retry {
                retry: attempt + 1,
                delay,
            }
        } else {
            states.remove(id);
            RetryDecision::Exhausted
        }
    }

    /// Forget a run after it succeeded.
    pub async fn clear(&self, id: &RunId) {
        self.states.lock().await.remove(id);
    }

    /// Retries granted so far, if the run has failed at least once.
    pub async fn retries_of(&self, id: &RunId) -> Option<u32> {
        self.states.lock().await.get(id).map(|s| s.attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max_retries: u32) -> RetryController {
        RetryController::new(RetryPolicy {
            max_retries,
            backoff_base: Duration::from_millis(500),
        })
    }

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
    }

    #[test]
    fn backoff_saturates() {
        let d = backoff_delay(Duration::from_secs(u64::MAX / 2), 10);
        assert_eq!(d, Duration::MAX);
    }

    #[tokio::test]
    async fn default_policy_retries_once() {
        let rc = controller(1);
        let id = RunId::from("r_a");
        assert_eq!(
            rc.on_failure(&id).await,
            RetryDecision::Retry {
                retry: 1,
                delay: Duration::from_millis(500)
            }
        );
        assert_eq!(rc.retries_of(&id).await, Some(1));
        assert_eq!(rc.on_failure(&id).await, RetryDecision::Exhausted);
        assert_eq!(rc.retries_of(&id).await, None);
    }

    #[tokio::test]
    async fn delays_follow_attempt_count() {
        let rc = controller(3);
        let id = RunId::from("r_b");
        let mut delays = Vec::new();
        while let RetryDecision::Retry { delay, .. } = rc.on_failure(&id).await {
            delays.push(delay);
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2)
            ]
        );
    }

    #[tokio::test]
    async fn zero_retries_exhausts_immediately() {
        let rc = controller(0);
        assert_eq!(rc.on_failure(&RunId::from("r_c")).await, RetryDecision::Exhausted);
    }

    #[tokio::test]
    async fn clear_resets_budget() {
        let rc = controller(1);
        let id = RunId::from("r_d");
        rc.on_failure(&id).await;
        rc.clear(&id).await;
        assert!(matches!(rc.on_failure(&id).await, RetryDecision::Retry { retry: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_waits_full_delay() {
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        assert!(sleep_or_cancel(Duration::from_secs(2), &cancel).await);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let started = tokio::time::Instant::now();
        assert!(!sleep_or_cancel(Duration::from_secs(60), &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
