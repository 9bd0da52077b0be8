//! Shared, expiring counter state.
//!
//! Every policy reads and writes through the `CounterStore` trait; nothing
//! about a caller's history is kept in a policy between requests.

mod backend;
mod key;
mod memory;
mod redis_store;

pub use self::backend::{CounterStore, SetSnapshot, WindowSnapshot};
pub use self::key::{CounterKey, EntryKind, Scope};
pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;
