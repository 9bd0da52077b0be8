//! Decision engine: runs every policy for a check and merges the verdicts.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::ban::BanPolicy;
use super::distinct::{DistinctIssuancePolicy, DistinctLimits};
use super::repeat::RepeatActionPolicy;
use super::verdict::Decision;
use crate::config::LimitsConfig;
use crate::error::{CustomsError, Result};
use crate::store::CounterStore;

/// One attempted action.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub action: String,
}

impl CheckRequest {
    pub fn new(ip: &str, email: &str, action: &str) -> Self {
        Self {
            ip: ip.to_string(),
            email: email.to_string(),
            action: action.to_string(),
        }
    }

    /// Reject requests with a missing or blank field.
    ///
    /// Values are otherwise taken as-is; emails and IPs are opaque here.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("ip", &self.ip), ("email", &self.email), ("action", &self.action)] {
            if value.trim().is_empty() {
                return Err(CustomsError::InvalidRequest(format!("{} is required", name)));
            }
        }
        Ok(())
    }
}

/// Evaluates checks against the repeat and distinct-issuance policies.
///
/// Holds no per-caller state; every decision is computed from the store.
pub struct DecisionEngine {
    store: Arc<dyn CounterStore>,
    repeat: RepeatActionPolicy,
    distinct: DistinctIssuancePolicy,
}

impl DecisionEngine {
    /// Create an engine over `store` with the given thresholds.
    pub fn new(store: Arc<dyn CounterStore>, limits: &LimitsConfig) -> Self {
        let repeat = RepeatActionPolicy::new(
            store.clone(),
            limits.rate_limit_interval(),
            limits.max_verify_codes,
        );
        let distinct = DistinctIssuancePolicy::new(
            store.clone(),
            BanPolicy::new(store.clone()),
            DistinctLimits {
                window: limits.ip_rate_limit_interval(),
                max_distinct: limits.max_distinct(),
                ban_duration: limits.ban_duration(),
            },
        );

        Self {
            store,
            repeat,
            distinct,
        }
    }

    /// Decide whether an attempt should be blocked.
    ///
    /// Both policies always run, even when the first already blocks, so each
    /// keeps an accurate count. Store failures are returned, never turned
    /// into a decision.
    pub async fn evaluate(&self, request: &CheckRequest) -> Result<Decision> {
        request.validate()?;

        let repeat = self
            .repeat
            .check(&request.email, &request.action)
            .await?;
        let distinct = self
            .distinct
            .check(&request.ip, &request.email, &request.action)
            .await?;

        let decision = Decision::merge(&[repeat, distinct]);

        if decision.block {
            info!(
                ip = %request.ip,
                action = %request.action,
                repeat_blocked = repeat.block,
                distinct_blocked = distinct.block,
                retry_after = ?decision.retry_after,
                "Attempt blocked"
            );
            debug!(email = %request.email, "Blocked attempt email");
        } else {
            debug!(
                ip = %request.ip,
                email = %request.email,
                action = %request.action,
                "Attempt allowed"
            );
        }

        Ok(decision)
    }

    /// Forget every counter, set and ban.
    pub async fn reset(&self) -> Result<()> {
        self.store.clear_all().await?;
        info!("Cleared all abuse-prevention state");
        Ok(())
    }
}
