//! Memcached Engine
//!
//! Values are stored as JSON text. Memcached counters are unsigned and
//! created by `incr` only in lenient mode, through an `add` of zero.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::codec::{decode, encode, multi_get_view};
use crate::cache::record::current_timestamp_ms;
use crate::cache::validate::{
    effective_default_ttl, effective_ttl, require_counter_delta, require_key, require_keys,
    require_lifetime, validate_value,
};
use crate::cache::{Cache, ConsistencyMode, LOCK_VALUE};
use crate::client::DistributedCacheClient;
use crate::config::Engine;
use crate::error::{CacheError, CacheResult, ClientError, ErrorCode};

/// Longest relative expiration memcached accepts; larger values are read as
/// absolute Unix timestamps.
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

/// Converts a lifetime in seconds to a memcached expiration value.
fn expiration(ttl_secs: u64) -> u32 {
    let absolute = if ttl_secs > MAX_RELATIVE_EXPIRATION {
        let now_secs = u64::try_from(current_timestamp_ms() / 1000).unwrap_or(0);
        now_secs.saturating_add(ttl_secs)
    } else {
        ttl_secs
    };
    u32::try_from(absolute).unwrap_or(u32::MAX)
}

// == Memcached Cache ==
/// Cache engine backed by a Memcached-like cluster.
pub struct MemcachedCache {
    client: Arc<dyn DistributedCacheClient>,
    consistency: ConsistencyMode,
    default_ttl: u64,
}

impl fmt::Debug for MemcachedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcachedCache")
            .field("consistency", &self.consistency)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl MemcachedCache {
    // == Constructor ==
    /// Creates an engine over `client`.
    ///
    /// # Arguments
    /// * `client` - Command channel to the cluster
    /// * `consistency` - Strict or lenient normalization
    /// * `default_ttl` - TTL in seconds for writes without one
    pub fn new(
        client: Arc<dyn DistributedCacheClient>,
        consistency: ConsistencyMode,
        default_ttl: u64,
    ) -> Self {
        let default_ttl = effective_default_ttl(default_ttl);
        info!(?consistency, default_ttl, "Memcached cache engine created");
        Self {
            client,
            consistency,
            default_ttl,
        }
    }

    fn check_value(
        &self,
        invalid_id: &'static str,
        array_id: &'static str,
        key: &str,
        value: &Value,
    ) -> CacheResult<()> {
        if !validate_value(value) {
            warn!(key, "Rejected cache value");
            return Err(CacheError::new(invalid_id, ErrorCode::InvalidCacheValue)
                .with("key", key)
                .with("value", value));
        }
        if value.is_array() && self.consistency.rejects_arrays() {
            return Err(CacheError::new(array_id, ErrorCode::ArrayIsInvalidCacheValue)
                .with("key", key)
                .with("value", value));
        }
        Ok(())
    }

    async fn store(
        &self,
        internal_id: &'static str,
        key: &str,
        value: &Value,
        ttl: Option<u64>,
    ) -> CacheResult<()> {
        let ttl = effective_ttl(ttl, self.default_ttl);
        self.client
            .set(key, &encode(value), expiration(ttl))
            .await
            .map_err(|e| backend_failure(internal_id, key, e))?;
        debug!(key, ttl, "Cache SET");
        Ok(())
    }

    /// Runs one counter command, seeding a missing key with zero when the
    /// mode allows and trying once more.
    async fn adjust_counter(
        &self,
        ids: CounterIds,
        key: &str,
        delta: i64,
        decrement: bool,
    ) -> CacheResult<i64> {
        // require_counter_delta guarantees a positive delta
        let amount = delta.unsigned_abs();

        let mut updated = self.counter_command(ids.backend, key, amount, decrement).await?;
        if updated.is_none() && self.consistency.auto_creates_counters() {
            debug!(key, "Creating counter at zero");
            self.client
                .add(key, "0", expiration(self.default_ttl))
                .await
                .map_err(|e| backend_failure(ids.backend, key, e))?;
            // A concurrent creator winning the add is fine; retry either way
            updated = self.counter_command(ids.backend, key, amount, decrement).await?;
        }

        let Some(updated) = updated else {
            return Err(CacheError::new(ids.missing, ErrorCode::MissingCacheKey)
                .with("key", key)
                .with("by_value", delta));
        };
        i64::try_from(updated).map_err(|_| {
            CacheError::new(ids.overflow, ErrorCode::SomethingWentWrong)
                .with("key", key)
                .caused_by(format!("counter value {} exceeds i64", updated))
        })
    }

    async fn counter_command(
        &self,
        internal_id: &'static str,
        key: &str,
        amount: u64,
        decrement: bool,
    ) -> CacheResult<Option<u64>> {
        let outcome = if decrement {
            self.client.decr(key, amount).await
        } else {
            self.client.incr(key, amount).await
        };
        outcome.map_err(|e| backend_failure(internal_id, key, e).with("by_value", amount))
    }
}

struct CounterIds {
    backend: &'static str,
    missing: &'static str,
    overflow: &'static str,
}

/// Maps a client failure to the public taxonomy.
fn backend_failure(internal_id: &'static str, key: &str, err: ClientError) -> CacheError {
    warn!(internal_id, key, error = %err, "Memcached command failed");
    let code = match err {
        ClientError::NonNumeric(_) => ErrorCode::NonNumericCacheValue,
        _ => ErrorCode::SomethingWentWrong,
    };
    CacheError::new(internal_id, code).with("key", key).caused_by(err)
}

#[async_trait]
impl Cache for MemcachedCache {
    fn engine(&self) -> Engine {
        Engine::Memcached
    }

    fn consistency(&self) -> ConsistencyMode {
        self.consistency
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        require_key("mcd.get.1", key)?;
        let raw = self
            .client
            .get(key)
            .await
            .map_err(|e| backend_failure("mcd.get.2", key, e))?;
        debug!(key, hit = raw.is_some(), "Cache GET");
        Ok(raw.map(decode))
    }

    async fn get_object(&self, key: &str) -> CacheResult<Option<Value>> {
        require_key("mcd.getobj.1", key)?;
        let raw = self
            .client
            .get(key)
            .await
            .map_err(|e| backend_failure("mcd.getobj.2", key, e))?;
        Ok(raw.map(decode))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> CacheResult<()> {
        require_key("mcd.set.1", key)?;
        self.check_value("mcd.set.2", "mcd.set.3", key, &value)?;
        self.store("mcd.set.4", key, &value, ttl).await
    }

    async fn set_object(&self, key: &str, object: Value, ttl: Option<u64>) -> CacheResult<()> {
        require_key("mcd.setobj.1", key)?;
        if !object.is_object() && !object.is_array() {
            return Err(CacheError::new("mcd.setobj.2", ErrorCode::InvalidCacheValue)
                .with("key", key)
                .with("value", &object));
        }
        self.check_value("mcd.setobj.3", "mcd.setobj.4", key, &object)?;
        self.store("mcd.setobj.5", key, &object, ttl).await
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        require_key("mcd.del.1", key)?;
        let removed = self
            .client
            .delete(key)
            .await
            .map_err(|e| backend_failure("mcd.del.2", key, e))?;
        debug!(key, removed, "Cache DEL");
        Ok(())
    }

    async fn multi_get(&self, keys: &[&str]) -> CacheResult<HashMap<String, Option<Value>>> {
        require_keys("mcd.mget.1", "mcd.mget.2", keys)?;
        let owned: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        let found = self.client.get_multi(&owned).await.map_err(|e| {
            backend_failure("mcd.mget.3", "", e).with("keys", keys)
        })?;

        let values = owned
            .into_iter()
            .map(|key| {
                // The same key may be listed more than once
                let value = found.get(&key).cloned().map(decode);
                (key, multi_get_view(value))
            })
            .collect();
        Ok(values)
    }

    async fn increment(&self, key: &str, by_value: Option<i64>) -> CacheResult<i64> {
        require_key("mcd.incr.1", key)?;
        let delta = require_counter_delta("mcd.incr.2", key, by_value)?;
        let ids = CounterIds {
            backend: "mcd.incr.3",
            missing: "mcd.incr.4",
            overflow: "mcd.incr.5",
        };
        let updated = self.adjust_counter(ids, key, delta, false).await?;
        debug!(key, delta, updated, "Cache INCR");
        Ok(updated)
    }

    async fn decrement(&self, key: &str, by_value: Option<i64>) -> CacheResult<i64> {
        require_key("mcd.decr.1", key)?;
        let delta = require_counter_delta("mcd.decr.2", key, by_value)?;
        let ids = CounterIds {
            backend: "mcd.decr.3",
            missing: "mcd.decr.4",
            overflow: "mcd.decr.5",
        };
        let updated = self.adjust_counter(ids, key, delta, true).await?;
        debug!(key, delta, updated, "Cache DECR");
        Ok(updated)
    }

    async fn touch(&self, key: &str, lifetime: i64) -> CacheResult<()> {
        require_key("mcd.touch.1", key)?;
        require_lifetime("mcd.touch.2", key, lifetime)?;

        // Memcached reads an expiration of zero as "never expire"
        let found = if lifetime == 0 && self.consistency.zero_lifetime_expires() {
            self.client
                .delete(key)
                .await
                .map_err(|e| backend_failure("mcd.touch.3", key, e))?
        } else {
            let lifetime_secs = lifetime.unsigned_abs();
            self.client
                .touch(key, expiration(lifetime_secs))
                .await
                .map_err(|e| backend_failure("mcd.touch.4", key, e))?
        };

        if !found {
            return Err(CacheError::new("mcd.touch.5", ErrorCode::MissingCacheKey)
                .with("key", key)
                .with("lifetime", lifetime));
        }
        debug!(key, lifetime, "Cache TOUCH");
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Option<u64>) -> CacheResult<()> {
        require_key("mcd.lock.1", key)?;
        let ttl = effective_ttl(ttl, self.default_ttl);

        let acquired = self
            .client
            .add(key, &encode(&Value::from(LOCK_VALUE)), expiration(ttl))
            .await
            .map_err(|e| backend_failure("mcd.lock.2", key, e))?;
        if !acquired {
            debug!(key, "Lock already held");
            return Err(CacheError::new("mcd.lock.3", ErrorCode::AcquireLockFailed)
                .with("key", key)
                .with("ttl", ttl));
        }
        debug!(key, ttl, "Lock acquired");
        Ok(())
    }

    async fn del_all(&self) -> CacheResult<()> {
        self.client.flush().await.map_err(|e| {
            warn!(error = %e, "Memcached flush_all failed");
            CacheError::new("mcd.flush.1", ErrorCode::FlushAllKeysFailed).caused_by(e)
        })?;
        info!("Memcached cluster flushed");
        Ok(())
    }
}
