//! Customs - Abuse Prevention Decision Service
//!
//! This crate decides whether an attempted action, identified by
//! `(action, ip, email)`, should be blocked. It throttles repeated identical
//! attempts per email, caps how many distinct emails one IP may trigger an
//! action for, and bans IPs that exceed that cap. All state lives in a shared
//! expiring counter store so any number of instances can serve the same
//! callers.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod policy;
pub mod store;
