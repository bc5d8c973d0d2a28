//! Cache trait definition
//!
//! The capability set shared by the in-memory, Redis and Memcached engines.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::ConsistencyMode;
use crate::config::Engine;
use crate::error::CacheResult;

/// Operations every cache engine exposes.
///
/// Domain failures (bad key, missing counter, lock held, backend error) are
/// returned as `CacheError`; no operation panics on data-shape problems.
/// A `ttl` of `None` or `Some(0)` falls back to the engine's default TTL.
#[async_trait]
pub trait Cache: Send + Sync + fmt::Debug {
    /// Which backend this engine talks to
    fn engine(&self) -> Engine;

    /// Consistency mode the engine was built with
    fn consistency(&self) -> ConsistencyMode;

    /// Get a value by key
    ///
    /// Returns `Ok(None)` when the key is absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Get a value stored through `set_object`
    async fn get_object(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Store a value, replacing any existing one
    async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> CacheResult<()>;

    /// Store a structured object
    async fn set_object(&self, key: &str, object: Value, ttl: Option<u64>) -> CacheResult<()>;

    /// Delete a key; succeeds whether or not it existed
    async fn del(&self, key: &str) -> CacheResult<()>;

    /// Get several keys at once
    ///
    /// Every requested key appears in the result. Structured values are
    /// always reported as `None`.
    async fn multi_get(&self, keys: &[&str]) -> CacheResult<HashMap<String, Option<Value>>>;

    /// Add `by_value` (default 1) to an integer value and return the result
    async fn increment(&self, key: &str, by_value: Option<i64>) -> CacheResult<i64>;

    /// Subtract `by_value` (default 1) from an integer value and return the result
    async fn decrement(&self, key: &str, by_value: Option<i64>) -> CacheResult<i64>;

    /// Replace the lifetime of an existing key, in seconds
    async fn touch(&self, key: &str, lifetime: i64) -> CacheResult<()>;

    /// Create `key` only if it is absent; fails with `acquire_lock_failed` otherwise
    async fn acquire_lock(&self, key: &str, ttl: Option<u64>) -> CacheResult<()>;

    /// Release a lock taken with `acquire_lock`
    async fn release_lock(&self, key: &str) -> CacheResult<()> {
        self.del(key).await
    }

    /// Delete every key the engine can reach
    async fn del_all(&self) -> CacheResult<()>;
}
