//! Per-policy verdicts and the merged decision.

use serde::Serialize;

/// What a single policy concluded about an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verdict {
    pub block: bool,
    /// Whole seconds until the block lifts; only set when blocked
    pub retry_after: Option<u64>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn block_for(retry_after: u64) -> Self {
        Self {
            block: true,
            retry_after: Some(retry_after),
        }
    }
}

/// The answer returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub block: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl Decision {
    /// Combine policy verdicts.
    ///
    /// Blocked if any verdict blocks; the wait is the longest any policy
    /// reported. An allowed decision never carries a wait.
    pub fn merge(verdicts: &[Verdict]) -> Self {
        let block = verdicts.iter().any(|v| v.block);
        let retry_after = block.then(|| {
            verdicts
                .iter()
                .map(|v| v.retry_after.unwrap_or(0))
                .max()
                .unwrap_or(0)
        });

        Self { block, retry_after }
    }
}
