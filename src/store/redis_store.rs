//! Redis-backed counter store shared by every instance of the service.
//!
//! Each compound operation runs as a single Lua script so Redis applies it
//! atomically; the process never performs read-modify-write itself. All
//! expiry is handled by Redis key TTLs.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisResult, Script};
use tracing::{debug, error, trace};

use super::backend::{CounterStore, SetSnapshot, WindowSnapshot};
use super::key::{CounterKey, EntryKind};
use crate::error::{CustomsError, Result};

/// INCR, arm the TTL when the window is new, report the remaining TTL.
const INCREMENT_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Read a window without counting.
const PEEK_WINDOW: &str = r#"
local count = redis.call('GET', KEYS[1])
if not count then
  return false
end
return {tonumber(count), redis.call('PTTL', KEYS[1])}
"#;

/// SADD, arm the TTL only when this call created the set.
const ADD_DISTINCT: &str = r#"
local existed = redis.call('EXISTS', KEYS[1])
redis.call('SADD', KEYS[1], ARGV[1])
if existed == 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return {redis.call('SCARD', KEYS[1]), redis.call('PTTL', KEYS[1])}
"#;

/// Delete every key under the service prefix in one step.
const CLEAR_PREFIX: &str = r#"
local keys = redis.call('KEYS', ARGV[1])
for i = 1, #keys, 1000 do
  redis.call('DEL', unpack(keys, i, math.min(i + 999, #keys)))
end
return #keys
"#;

fn millis(ttl: Duration) -> u64 {
    // PEXPIRE 0 deletes the key outright
    (ttl.as_millis() as u64).max(1)
}

fn ttl_from_pttl(pttl: i64) -> Duration {
    Duration::from_millis(pttl.max(0) as u64)
}

/// Escape glob metacharacters so the prefix matches literally in `KEYS`.
fn glob_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A `CounterStore` backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    timeout: Duration,
    increment_window: Script,
    peek_window: Script,
    add_distinct: Script,
    clear_prefix: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis at `url`.
    ///
    /// Every later call is bounded by `timeout`.
    pub async fn connect(url: &str, prefix: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                CustomsError::StoreUnavailable(format!("timed out connecting to {}", url))
            })??;

        debug!(prefix = %prefix, "Connected to Redis counter store");

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            timeout,
            increment_window: Script::new(INCREMENT_WINDOW),
            peek_window: Script::new(PEEK_WINDOW),
            add_distinct: Script::new(ADD_DISTINCT),
            clear_prefix: Script::new(CLEAR_PREFIX),
        })
    }

    fn key(&self, key: &CounterKey, kind: EntryKind) -> String {
        key.to_store_key(&self.prefix, kind)
    }

    /// Run one store call under the configured timeout.
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        T: Send,
        F: Future<Output = RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(op = op, error = %e, "Redis call failed");
                Err(CustomsError::from(e))
            }
            Err(_) => {
                error!(op = op, timeout_ms = self.timeout.as_millis() as u64, "Redis call timed out");
                Err(CustomsError::StoreUnavailable(format!("{} timed out", op)))
            }
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_window(&self, key: &CounterKey, ttl: Duration) -> Result<WindowSnapshot> {
        let redis_key = self.key(key, EntryKind::Window);
        let mut conn = self.conn.clone();
        let mut invocation = self.increment_window.key(&redis_key);
        invocation.arg(millis(ttl));

        let (count, pttl): (u64, i64) = self
            .bounded("increment_window", invocation.invoke_async(&mut conn))
            .await?;

        trace!(key = %redis_key, count = count, "Incremented window");
        Ok(WindowSnapshot {
            count,
            remaining: ttl_from_pttl(pttl),
        })
    }

    async fn peek_window(&self, key: &CounterKey) -> Result<Option<WindowSnapshot>> {
        let redis_key = self.key(key, EntryKind::Window);
        let mut conn = self.conn.clone();
        let invocation = self.peek_window.key(&redis_key);

        let state: Option<(u64, i64)> = self
            .bounded("peek_window", invocation.invoke_async(&mut conn))
            .await?;

        Ok(state.map(|(count, pttl)| WindowSnapshot {
            count,
            remaining: ttl_from_pttl(pttl),
        }))
    }

    async fn add_distinct_member(
        &self,
        key: &CounterKey,
        member: &str,
        ttl: Duration,
    ) -> Result<SetSnapshot> {
        let redis_key = self.key(key, EntryKind::Distinct);
        let mut conn = self.conn.clone();
        let mut invocation = self.add_distinct.key(&redis_key);
        invocation.arg(member).arg(millis(ttl));

        let (size, pttl): (u64, i64) = self
            .bounded("add_distinct_member", invocation.invoke_async(&mut conn))
            .await?;

        trace!(key = %redis_key, size = size, "Added distinct member");
        Ok(SetSnapshot {
            size,
            remaining: ttl_from_pttl(pttl),
        })
    }

    async fn is_member(&self, key: &CounterKey, member: &str) -> Result<bool> {
        let redis_key = self.key(key, EntryKind::Distinct);
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SISMEMBER");
        cmd.arg(&redis_key).arg(member);

        self.bounded("is_member", cmd.query_async(&mut conn)).await
    }

    async fn set_ban(&self, key: &CounterKey, ttl: Duration) -> Result<()> {
        let redis_key = self.key(key, EntryKind::Ban);
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(&redis_key).arg(1).arg("PX").arg(millis(ttl));

        let _: () = self.bounded("set_ban", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn get_ban(&self, key: &CounterKey) -> Result<Option<Duration>> {
        let redis_key = self.key(key, EntryKind::Ban);
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(&redis_key);

        let pttl: i64 = self.bounded("get_ban", cmd.query_async(&mut conn)).await?;

        // -2: no such key. -1 cannot happen since bans are always written with PX.
        Ok((pttl > 0).then(|| ttl_from_pttl(pttl)))
    }

    async fn clear_all(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}|*", glob_escape(&self.prefix));
        let mut invocation = self.clear_prefix.prepare_invoke();
        invocation.arg(&pattern);

        let removed: u64 = self
            .bounded("clear_all", invocation.invoke_async(&mut conn))
            .await?;

        debug!(removed = removed, prefix = %self.prefix, "Cleared Redis counter store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_never_zero() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_ttl_from_pttl() {
        assert_eq!(ttl_from_pttl(1500), Duration::from_millis(1500));
        assert_eq!(ttl_from_pttl(-2), Duration::ZERO);
    }

    #[test]
    fn test_glob_escape() {
        assert_eq!(glob_escape("customs"), "customs");
        assert_eq!(glob_escape("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[tokio::test]
    async fn test_unreachable_redis_is_store_unavailable() {
        // Nothing listens on port 1; refusal and timeout both surface the same way
        let result =
            RedisStore::connect("redis://127.0.0.1:1", "customs-test", Duration::from_millis(200))
                .await;
        assert!(matches!(result, Err(CustomsError::StoreUnavailable(_))));
    }

    /// Connect to the Redis named by `CUSTOMS_TEST_REDIS_URL`, if any.
    ///
    /// Each test uses its own prefix so tests can run in parallel.
    async fn test_store(prefix: &str) -> Option<RedisStore> {
        let url = std::env::var("CUSTOMS_TEST_REDIS_URL").ok()?;
        let store = RedisStore::connect(&url, prefix, Duration::from_secs(2))
            .await
            .unwrap();
        store.clear_all().await.unwrap();
        Some(store)
    }

    #[tokio::test]
    async fn test_redis_window_lifecycle() {
        let Some(store) = test_store("customs-test-window").await else {
            return;
        };
        let key = CounterKey::email("verify", "test1@example.com");

        assert_eq!(store.peek_window(&key).await.unwrap(), None);

        let first = store.increment_window(&key, Duration::from_secs(1)).await.unwrap();
        let second = store.increment_window(&key, Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(second.remaining <= Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let fresh = store.increment_window(&key, Duration::from_secs(1)).await.unwrap();
        assert_eq!(fresh.count, 1);

        store.clear_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_distinct_and_ban() {
        let Some(store) = test_store("customs-test-distinct").await else {
            return;
        };
        let key = CounterKey::ip("verify", "192.0.2.1");
        let ttl = Duration::from_secs(30);

        assert_eq!(store.add_distinct_member(&key, "a", ttl).await.unwrap().size, 1);
        assert_eq!(store.add_distinct_member(&key, "a", ttl).await.unwrap().size, 1);
        assert_eq!(store.add_distinct_member(&key, "b", ttl).await.unwrap().size, 2);
        assert!(store.is_member(&key, "a").await.unwrap());
        assert!(!store.is_member(&key, "c").await.unwrap());

        assert_eq!(store.get_ban(&key).await.unwrap(), None);
        store.set_ban(&key, ttl).await.unwrap();
        assert!(store.get_ban(&key).await.unwrap().is_some());

        store.clear_all().await.unwrap();
        assert_eq!(store.get_ban(&key).await.unwrap(), None);
        assert!(!store.is_member(&key, "a").await.unwrap());
    }
}
