//! Throttling of repeated identical `(email, action)` attempts.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::verdict::Verdict;
use crate::clock::ceil_secs;
use crate::error::Result;
use crate::store::{CounterKey, CounterStore};

/// Allows `max_attempts` attempts per email and action inside each window.
pub struct RepeatActionPolicy {
    store: Arc<dyn CounterStore>,
    window: Duration,
    max_attempts: u64,
}

impl RepeatActionPolicy {
    pub fn new(store: Arc<dyn CounterStore>, window: Duration, max_attempts: u64) -> Self {
        Self {
            store,
            window,
            max_attempts,
        }
    }

    /// Count this attempt and decide whether it goes over the cap.
    ///
    /// The first `max_attempts` attempts in a window pass; the next one blocks
    /// until the window expires.
    pub async fn check(&self, email: &str, action: &str) -> Result<Verdict> {
        let key = CounterKey::email(action, email);
        let window = self.store.increment_window(&key, self.window).await?;

        trace!(key = %key, count = window.count, limit = self.max_attempts, "Repeat attempt counted");

        if window.count > self.max_attempts {
            let retry_after = ceil_secs(window.remaining);
            debug!(
                key = %key,
                count = window.count,
                retry_after = retry_after,
                "Repeat attempt limit exceeded"
            );
            return Ok(Verdict::block_for(retry_after));
        }

        Ok(Verdict::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn policy(max_attempts: u64, window_secs: u64) -> (RepeatActionPolicy, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        (
            RepeatActionPolicy::new(store, Duration::from_secs(window_secs), max_attempts),
            clock,
        )
    }

    #[tokio::test]
    async fn test_first_attempts_allowed_then_blocked() {
        let (policy, _clock) = policy(3, 60);

        for i in 1..=3 {
            let verdict = policy.check("a@example.com", "verify").await.unwrap();
            assert!(!verdict.block, "attempt {} should be allowed", i);
        }

        let verdict = policy.check("a@example.com", "verify").await.unwrap();
        assert_eq!(verdict, Verdict::block_for(60));
    }

    #[tokio::test]
    async fn test_retry_after_rounds_up() {
        let (policy, clock) = policy(1, 10);

        policy.check("a@example.com", "verify").await.unwrap();
        clock.advance(Duration::from_millis(2500));

        let verdict = policy.check("a@example.com", "verify").await.unwrap();
        assert_eq!(verdict.retry_after, Some(8));
    }

    #[tokio::test]
    async fn test_window_reset_after_expiry() {
        let (policy, clock) = policy(2, 1);

        policy.check("a@example.com", "verify").await.unwrap();
        policy.check("a@example.com", "verify").await.unwrap();
        assert!(policy.check("a@example.com", "verify").await.unwrap().block);

        clock.advance(Duration::from_millis(1010));
        assert!(!policy.check("a@example.com", "verify").await.unwrap().block);
    }

    #[tokio::test]
    async fn test_emails_and_actions_counted_separately() {
        let (policy, _clock) = policy(1, 60);

        assert!(!policy.check("a@example.com", "verify").await.unwrap().block);
        assert!(!policy.check("b@example.com", "verify").await.unwrap().block);
        assert!(!policy.check("a@example.com", "reset").await.unwrap().block);
        assert!(policy.check("a@example.com", "verify").await.unwrap().block);
    }

    #[tokio::test]
    async fn test_zero_cap_blocks_everything() {
        let (policy, _clock) = policy(0, 5);
        assert_eq!(
            policy.check("a@example.com", "verify").await.unwrap(),
            Verdict::block_for(5)
        );
    }
}
