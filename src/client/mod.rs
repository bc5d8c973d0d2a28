//! Remote Client Module
//!
//! The narrow command sets the Redis and Memcached engines need from their
//! backends. Engines hold an `Arc<dyn ...Client>`, so any implementation with
//! native backend semantics can stand in for the network clients.

mod memcached;
mod redis;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ClientResult;

pub use self::memcached::MemcachedClient;
pub use self::redis::{redact_url, RedisClient};

// == Key-Value Client ==
/// Redis-like command set. Values are text; counters are decimal text.
#[async_trait]
pub trait KeyValueClient: Send + Sync {
    /// GET
    async fn get(&self, key: &str) -> ClientResult<Option<String>>;

    /// SET key value EX ttl
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> ClientResult<()>;

    /// SET key value NX EX ttl. Returns false when the key already exists.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> ClientResult<bool>;

    /// DEL
    async fn del(&self, key: &str) -> ClientResult<()>;

    /// MGET, one slot per requested key in request order
    async fn mget(&self, keys: &[String]) -> ClientResult<Vec<Option<String>>>;

    /// INCRBY. Fails with `ClientError::NonNumeric` on non-integer values.
    async fn incr_by(&self, key: &str, delta: i64) -> ClientResult<i64>;

    /// DECRBY. Fails with `ClientError::NonNumeric` on non-integer values.
    async fn decr_by(&self, key: &str, delta: i64) -> ClientResult<i64>;

    /// EXPIRE. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl_secs: i64) -> ClientResult<bool>;

    /// Replaces the hash at `key` with `fields` and sets its TTL, atomically.
    async fn replace_hash(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl_secs: u64,
    ) -> ClientResult<()>;

    /// HGETALL. An absent key reads as an empty map.
    async fn get_hash(&self, key: &str) -> ClientResult<HashMap<String, String>>;

    /// FLUSHDB
    async fn flush_db(&self) -> ClientResult<()>;
}

// == Distributed Cache Client ==
/// Memcached-like command set. Expirations follow memcached rules: zero means
/// never, values above thirty days are absolute Unix timestamps.
#[async_trait]
pub trait DistributedCacheClient: Send + Sync {
    async fn get(&self, key: &str) -> ClientResult<Option<String>>;

    /// Returns only the keys that were found.
    async fn get_multi(&self, keys: &[String]) -> ClientResult<HashMap<String, String>>;

    async fn set(&self, key: &str, value: &str, expiration: u32) -> ClientResult<()>;

    /// Stores only if absent. Returns false when the key already exists.
    async fn add(&self, key: &str, value: &str, expiration: u32) -> ClientResult<bool>;

    /// Returns false when the key did not exist.
    async fn delete(&self, key: &str) -> ClientResult<bool>;

    /// Returns `None` when the key does not exist.
    async fn incr(&self, key: &str, delta: u64) -> ClientResult<Option<u64>>;

    /// Returns `None` when the key does not exist. Floors at zero.
    async fn decr(&self, key: &str, delta: u64) -> ClientResult<Option<u64>>;

    /// Returns false when the key does not exist.
    async fn touch(&self, key: &str, expiration: u32) -> ClientResult<bool>;

    async fn flush(&self) -> ClientResult<()>;
}
