//! In-process counter store.
//!
//! Suitable for a single instance or for tests. State lives in three
//! `DashMap`s, one per entity kind; the per-key entry lock provides the
//! atomicity the `CounterStore` contract asks for.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::backend::{CounterStore, SetSnapshot, WindowSnapshot};
use super::key::CounterKey;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// Expiry for an entry created at `now` that should live for `ttl`.
fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn remaining_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (expires_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Attempts seen for a key since its window started.
#[derive(Debug)]
struct WindowCounter {
    count: u64,
    expires_at: DateTime<Utc>,
}

impl WindowCounter {
    fn fresh(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            count: 0,
            expires_at: expiry(now, ttl),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn snapshot(&self, now: DateTime<Utc>) -> WindowSnapshot {
        WindowSnapshot {
            count: self.count,
            remaining: remaining_until(self.expires_at, now),
        }
    }
}

/// Emails granted an action from one IP inside the current window.
#[derive(Debug)]
struct DistinctSet {
    members: HashSet<String>,
    expires_at: DateTime<Utc>,
}

impl DistinctSet {
    fn fresh(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            members: HashSet::new(),
            expires_at: expiry(now, ttl),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct BanRecord {
    expires_at: DateTime<Utc>,
}

impl BanRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A `CounterStore` held entirely in process memory.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    /// Shared by every operation, taken exclusively by `clear_all` so a
    /// reset never interleaves with a half-applied update.
    gate: RwLock<()>,
    windows: DashMap<CounterKey, WindowCounter>,
    sets: DashMap<CounterKey, DistinctSet>,
    bans: DashMap<CounterKey, BanRecord>,
}

impl MemoryStore {
    /// Create a store driven by the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            gate: RwLock::new(()),
            windows: DashMap::new(),
            sets: DashMap::new(),
            bans: DashMap::new(),
        }
    }

    /// Drop every expired entry, returning how many were removed.
    ///
    /// Expired entries already read as absent; this only reclaims memory.
    pub fn purge_expired(&self) -> usize {
        let _gate = self.gate.read();
        let now = self.clock.now();
        let before = self.entry_count();

        self.windows.retain(|_, counter| !counter.is_expired(now));
        self.sets.retain(|_, set| !set.is_expired(now));
        self.bans.retain(|_, ban| !ban.is_expired(now));

        let removed = before.saturating_sub(self.entry_count());
        if removed > 0 {
            debug!(removed = removed, "Purged expired entries");
        }
        removed
    }

    /// Number of stored entries of every kind, expired or not.
    pub fn entry_count(&self) -> usize {
        self.windows.len() + self.sets.len() + self.bans.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_window(&self, key: &CounterKey, ttl: Duration) -> Result<WindowSnapshot> {
        let _gate = self.gate.read();
        let now = self.clock.now();

        let mut counter = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| WindowCounter::fresh(now, ttl));

        if counter.is_expired(now) {
            // A late attempt opens a new window rather than extending the old one
            *counter = WindowCounter::fresh(now, ttl);
        }
        counter.count += 1;

        trace!(key = %key, count = counter.count, "Incremented window");
        Ok(counter.snapshot(now))
    }

    async fn peek_window(&self, key: &CounterKey) -> Result<Option<WindowSnapshot>> {
        let _gate = self.gate.read();
        let now = self.clock.now();

        Ok(self
            .windows
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .map(|counter| counter.snapshot(now)))
    }

    async fn add_distinct_member(
        &self,
        key: &CounterKey,
        member: &str,
        ttl: Duration,
    ) -> Result<SetSnapshot> {
        let _gate = self.gate.read();
        let now = self.clock.now();

        let mut set = self
            .sets
            .entry(key.clone())
            .or_insert_with(|| DistinctSet::fresh(now, ttl));

        if set.is_expired(now) {
            *set = DistinctSet::fresh(now, ttl);
        }
        if !set.members.contains(member) {
            set.members.insert(member.to_string());
        }

        trace!(key = %key, size = set.members.len(), "Added distinct member");
        Ok(SetSnapshot {
            size: set.members.len() as u64,
            remaining: remaining_until(set.expires_at, now),
        })
    }

    async fn is_member(&self, key: &CounterKey, member: &str) -> Result<bool> {
        let _gate = self.gate.read();
        let now = self.clock.now();

        Ok(self
            .sets
            .get(key)
            .map(|set| !set.is_expired(now) && set.members.contains(member))
            .unwrap_or(false))
    }

    async fn set_ban(&self, key: &CounterKey, ttl: Duration) -> Result<()> {
        let _gate = self.gate.read();
        let now = self.clock.now();

        self.bans.insert(
            key.clone(),
            BanRecord {
                expires_at: expiry(now, ttl),
            },
        );
        Ok(())
    }

    async fn get_ban(&self, key: &CounterKey) -> Result<Option<Duration>> {
        let _gate = self.gate.read();
        let now = self.clock.now();

        Ok(self
            .bans
            .get(key)
            .filter(|ban| !ban.is_expired(now))
            .map(|ban| remaining_until(ban.expires_at, now)))
    }

    async fn clear_all(&self) -> Result<()> {
        let _gate = self.gate.write();

        self.windows.clear();
        self.sets.clear();
        self.bans.clear();

        debug!("Cleared all counters, sets and bans");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    fn email_key() -> CounterKey {
        CounterKey::email("verify", "test1@example.com")
    }

    fn ip_key() -> CounterKey {
        CounterKey::ip("verify", "192.0.2.1")
    }

    #[tokio::test]
    async fn test_increment_creates_window() {
        let (store, _clock) = store_with_clock();

        let snapshot = store.increment_window(&email_key(), Duration::from_secs(10)).await.unwrap();

        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.remaining, Duration::from_secs(10));
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_increment_keeps_expiry() {
        let (store, clock) = store_with_clock();
        let key = email_key();

        store.increment_window(&key, Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(4));
        let snapshot = store.increment_window(&key, Duration::from_secs(10)).await.unwrap();

        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.remaining, Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_expired_window_starts_over() {
        let (store, clock) = store_with_clock();
        let key = email_key();

        for _ in 0..3 {
            store.increment_window(&key, Duration::from_secs(1)).await.unwrap();
        }
        clock.advance(Duration::from_millis(1010));

        assert_eq!(store.peek_window(&key).await.unwrap(), None);

        let snapshot = store.increment_window(&key, Duration::from_secs(1)).await.unwrap();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.remaining, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_window_expires_exactly_at_deadline() {
        let (store, clock) = store_with_clock();
        let key = email_key();

        store.increment_window(&key, Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(1));

        assert_eq!(store.peek_window(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_peek_does_not_count() {
        let (store, _clock) = store_with_clock();
        let key = email_key();

        assert_eq!(store.peek_window(&key).await.unwrap(), None);
        store.increment_window(&key, Duration::from_secs(5)).await.unwrap();

        let peeked = store.peek_window(&key).await.unwrap().unwrap();
        assert_eq!(peeked.count, 1);
        let peeked = store.peek_window(&key).await.unwrap().unwrap();
        assert_eq!(peeked.count, 1);
    }

    #[tokio::test]
    async fn test_distinct_repeat_member_is_noop() {
        let (store, clock) = store_with_clock();
        let key = ip_key();
        let ttl = Duration::from_secs(10);

        assert_eq!(store.add_distinct_member(&key, "a@example.com", ttl).await.unwrap().size, 1);
        clock.advance(Duration::from_secs(3));
        let again = store.add_distinct_member(&key, "a@example.com", ttl).await.unwrap();

        assert_eq!(again.size, 1);
        assert_eq!(again.remaining, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_distinct_add_never_extends_expiry() {
        let (store, clock) = store_with_clock();
        let key = ip_key();
        let ttl = Duration::from_secs(10);

        store.add_distinct_member(&key, "a@example.com", ttl).await.unwrap();
        clock.advance(Duration::from_secs(8));
        let snapshot = store.add_distinct_member(&key, "b@example.com", ttl).await.unwrap();

        assert_eq!(snapshot.size, 2);
        assert_eq!(snapshot.remaining, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_membership_respects_expiry() {
        let (store, clock) = store_with_clock();
        let key = ip_key();

        store.add_distinct_member(&key, "a@example.com", Duration::from_secs(1)).await.unwrap();
        assert!(store.is_member(&key, "a@example.com").await.unwrap());
        assert!(!store.is_member(&key, "b@example.com").await.unwrap());

        clock.advance(Duration::from_secs(2));
        assert!(!store.is_member(&key, "a@example.com").await.unwrap());

        let snapshot = store.add_distinct_member(&key, "b@example.com", Duration::from_secs(1)).await.unwrap();
        assert_eq!(snapshot.size, 1);
    }

    #[tokio::test]
    async fn test_ban_lifecycle() {
        let (store, clock) = store_with_clock();
        let key = ip_key();

        assert_eq!(store.get_ban(&key).await.unwrap(), None);

        store.set_ban(&key, Duration::from_secs(30)).await.unwrap();
        clock.advance(Duration::from_millis(500));
        assert_eq!(store.get_ban(&key).await.unwrap(), Some(Duration::from_millis(29_500)));

        clock.advance(Duration::from_secs(30));
        assert_eq!(store.get_ban(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_ban_wins() {
        let (store, _clock) = store_with_clock();
        let key = ip_key();

        store.set_ban(&key, Duration::from_secs(60)).await.unwrap();
        store.set_ban(&key, Duration::from_secs(5)).await.unwrap();

        assert_eq!(store.get_ban(&key).await.unwrap(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_kinds_do_not_collide() {
        let (store, _clock) = store_with_clock();
        let key = ip_key();

        store.increment_window(&key, Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.get_ban(&key).await.unwrap(), None);
        assert!(!store.is_member(&key, "192.0.2.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (store, _clock) = store_with_clock();
        let ttl = Duration::from_secs(60);

        store.increment_window(&email_key(), ttl).await.unwrap();
        store.add_distinct_member(&ip_key(), "a@example.com", ttl).await.unwrap();
        store.set_ban(&ip_key(), ttl).await.unwrap();
        assert_eq!(store.entry_count(), 3);

        store.clear_all().await.unwrap();

        assert_eq!(store.entry_count(), 0);
        assert_eq!(store.peek_window(&email_key()).await.unwrap(), None);
        assert_eq!(store.get_ban(&ip_key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store_with_clock();

        store.increment_window(&email_key(), Duration::from_secs(1)).await.unwrap();
        store.set_ban(&ip_key(), Duration::from_secs(60)).await.unwrap();

        clock.advance(Duration::from_secs(2));

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.entry_count(), 1);
        assert!(store.get_ban(&ip_key()).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let key = email_key();

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    store.increment_window(&key, Duration::from_secs(60)).await.unwrap().count
                })
            })
            .collect();

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();

        assert_eq!(counts, (1..=64).collect::<Vec<u64>>());
    }
}
