//! Long-lived bans on an `(ip, action)` pair.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::clock::ceil_secs;
use crate::error::Result;
use crate::store::{CounterKey, CounterStore};

/// Reads and imposes bans.
///
/// A ban is its own store record with its own expiry. Windows and distinct
/// sets expiring around it never clear it, and nothing but expiry or a bulk
/// reset shortens it.
#[derive(Clone)]
pub struct BanPolicy {
    store: Arc<dyn CounterStore>,
}

impl BanPolicy {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Remaining ban in whole seconds (rounded up), or `None` when not banned.
    pub async fn is_banned(&self, ip: &str, action: &str) -> Result<Option<u64>> {
        let key = CounterKey::ip(action, ip);
        let remaining = self.store.get_ban(&key).await?;
        Ok(remaining.map(ceil_secs))
    }

    /// Ban `ip` from `action` for `ttl`. A later impose replaces an earlier one.
    pub async fn impose_ban(&self, ip: &str, action: &str, ttl: Duration) -> Result<()> {
        let key = CounterKey::ip(action, ip);
        self.store.set_ban(&key, ttl).await?;

        warn!(ip = %ip, action = %action, duration_secs = ttl.as_secs(), "Imposed ban");
        Ok(())
    }
}
