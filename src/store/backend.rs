//! Counter store trait for abstracting in-memory and shared implementations.

use std::time::Duration;

use async_trait::async_trait;

use super::key::CounterKey;
use crate::error::Result;

/// State of a window counter right after an increment or peek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Attempts seen since the window started
    pub count: u64,
    /// Time left until the window expires
    pub remaining: Duration,
}

/// State of a distinct set right after an add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetSnapshot {
    /// Number of distinct members in the set
    pub size: u64,
    /// Time left until the set expires
    pub remaining: Duration,
}

/// Trait for counter store implementations.
///
/// Every operation is atomic with respect to concurrent callers on the same
/// key; callers never read-modify-write. An entry past its expiry is treated
/// as absent by every operation. A backend that cannot be reached fails with
/// `CustomsError::StoreUnavailable`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one attempt against the window for `key`.
    ///
    /// Creates the window with `count = 1` expiring after `ttl` when absent;
    /// otherwise increments without touching the expiry.
    async fn increment_window(&self, key: &CounterKey, ttl: Duration) -> Result<WindowSnapshot>;

    /// Read the window for `key` without counting an attempt.
    async fn peek_window(&self, key: &CounterKey) -> Result<Option<WindowSnapshot>>;

    /// Add `member` to the distinct set for `key`.
    ///
    /// Creates the set expiring after `ttl` when absent. Adding a member that
    /// is already present changes nothing. The expiry is never extended once
    /// the set exists.
    async fn add_distinct_member(
        &self,
        key: &CounterKey,
        member: &str,
        ttl: Duration,
    ) -> Result<SetSnapshot>;

    /// Whether `member` is in the live distinct set for `key`.
    async fn is_member(&self, key: &CounterKey, member: &str) -> Result<bool>;

    /// Record a ban for `key` lasting `ttl`, replacing any existing one.
    async fn set_ban(&self, key: &CounterKey, ttl: Duration) -> Result<()>;

    /// Remaining time on the ban for `key`, if one is active.
    async fn get_ban(&self, key: &CounterKey) -> Result<Option<Duration>>;

    /// Wipe every window, set and ban.
    async fn clear_all(&self) -> Result<()>;
}
