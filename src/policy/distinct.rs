//! Caps on how many distinct emails one IP may trigger an action for.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::ban::BanPolicy;
use super::verdict::Verdict;
use crate::clock::ceil_secs;
use crate::error::Result;
use crate::store::{CounterKey, CounterStore};

/// Thresholds for distinct-issuance checks.
#[derive(Debug, Clone, Copy)]
pub struct DistinctLimits {
    /// Length of the distinct-set window
    pub window: Duration,
    /// Emails allowed per window
    pub max_distinct: u64,
    /// Ban imposed when the cap is exceeded
    pub ban_duration: Duration,
}

/// Counts unique emails per `(ip, action)` and bans IPs that go over.
pub struct DistinctIssuancePolicy {
    store: Arc<dyn CounterStore>,
    bans: BanPolicy,
    limits: DistinctLimits,
}

impl DistinctIssuancePolicy {
    pub fn new(store: Arc<dyn CounterStore>, bans: BanPolicy, limits: DistinctLimits) -> Self {
        Self {
            store,
            bans,
            limits,
        }
    }

    /// Decide on an attempt by `ip` to trigger `action` for `email`.
    ///
    /// An active ban blocks outright. An email already granted in this window
    /// passes without touching the cap. A new email that takes the set past
    /// the cap is blocked and bans the IP.
    pub async fn check(&self, ip: &str, email: &str, action: &str) -> Result<Verdict> {
        if let Some(remaining) = self.bans.is_banned(ip, action).await? {
            debug!(ip = %ip, action = %action, retry_after = remaining, "Attempt from banned IP");
            return Ok(Verdict::block_for(remaining));
        }

        let key = CounterKey::ip(action, ip);

        if self.store.is_member(&key, email).await? {
            trace!(key = %key, "Email already granted in this window");
            return Ok(Verdict::allow());
        }

        let set = self
            .store
            .add_distinct_member(&key, email, self.limits.window)
            .await?;

        trace!(key = %key, size = set.size, limit = self.limits.max_distinct, "Distinct email counted");

        if set.size > self.limits.max_distinct {
            self.bans
                .impose_ban(ip, action, self.limits.ban_duration)
                .await?;

            // This first blocked response reports the window; later ones
            // report the ban through the check above.
            let retry_after = ceil_secs(set.remaining);
            debug!(
                key = %key,
                size = set.size,
                retry_after = retry_after,
                "Distinct email limit exceeded"
            );
            return Ok(Verdict::block_for(retry_after));
        }

        Ok(Verdict::allow())
    }
}
