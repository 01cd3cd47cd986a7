use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A member pulled out of a score-ordered set, with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: Vec<u8>,
    pub score: f64,
}

/// Abstraction over the shared store's primitive operations, narrow enough
/// to be implemented by an in-process map or a Redis-like broker.
///
/// Reservation tokens and `QueueMessage` payloads are always passed as raw
/// bytes and must round-trip byte-identically: callers must never decode and
/// re-encode a member before removing it (see `ao-keyspace`'s crate docs on
/// the encoding pitfall this guards against).
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Appends `value` to the tail of the list at `key`.
    async fn list_push(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Removes up to one occurrence of `value` from the list at `key`.
    /// Returns the number of elements removed (0 or 1).
    async fn list_remove(&self, key: &str, value: &[u8]) -> StoreResult<u64>;

    /// Adds `member` to the sorted set at `key` with the given `score`.
    async fn sorted_set_add(&self, key: &str, score: f64, member: Vec<u8>) -> StoreResult<()>;

    /// Atomically removes and returns the lowest-scored member of the
    /// sorted set at `key`, or `None` if it is empty.
    async fn sorted_set_pop_min(&self, key: &str) -> StoreResult<Option<ScoredMember>>;

    /// Returns every member of the sorted set at `key` with score in
    /// `[min_score, max_score]`, ordered ascending by score.
    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min_score: f64,
        max_score: f64,
    ) -> StoreResult<Vec<ScoredMember>>;

    /// Removes `member` from the sorted set at `key`. Returns whether it was
    /// present.
    async fn sorted_set_remove(&self, key: &str, member: &[u8]) -> StoreResult<bool>;

    /// Sets `field` in the hash at `key` to `value`.
    async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Returns `field` from the hash at `key`, if present.
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Removes `field` from the hash at `key`. Returns whether it was
    /// present. Idempotent.
    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool>;

    /// Returns every field/value pair in the hash at `key`.
    async fn hash_get_all(&self, key: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Increments `field` in the hash at `key` by `delta`, creating it at 0
    /// first if absent, and returns the new value.
    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    /// Returns every key matching a `*`-glob pattern. Backends that cannot
    /// scan atomically may combine multiple passes internally (the state
    /// validator already tolerates a key being missed by one pass and caught
    /// by another).
    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>>;
}
