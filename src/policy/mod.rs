//! Abuse-prevention policies and the engine that combines them.

mod ban;
mod distinct;
mod engine;
mod repeat;
mod verdict;

pub use ban::BanPolicy;
pub use distinct::{DistinctIssuancePolicy, DistinctLimits};
pub use engine::{CheckRequest, DecisionEngine};
pub use repeat::RepeatActionPolicy;
pub use verdict::{Decision, Verdict};
