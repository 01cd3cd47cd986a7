//! Canonical key layout and the `SharedStore` abstraction over it.
//!
//! Every coordinator/validator/event-bus key lives under a configurable
//! `key_prefix` (default `"ao"`). See [`keys`] for the exact layout.

pub mod keys;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use keys::Keys;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{ScoredMember, SharedStore, StoreError};
