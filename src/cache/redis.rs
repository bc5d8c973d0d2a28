//! Redis Engine
//!
//! Scalars live in plain string keys as JSON text; `set_object` writes a hash
//! with one JSON-encoded field per object member. Counters are read before
//! they are changed, so both modes fail on a missing key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::cache::codec::{decode, encode, multi_get_view};
use crate::cache::validate::{
    effective_default_ttl, effective_ttl, is_scalar, require_counter_delta, require_key,
    require_keys, require_lifetime, validate_value,
};
use crate::cache::{Cache, ConsistencyMode, LOCK_VALUE};
use crate::client::KeyValueClient;
use crate::config::Engine;
use crate::error::{CacheError, CacheResult, ClientError, ErrorCode};

// == Redis Cache ==
/// Cache engine backed by a Redis-like key-value server.
pub struct RedisCache {
    client: Arc<dyn KeyValueClient>,
    consistency: ConsistencyMode,
    default_ttl: u64,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("consistency", &self.consistency)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    // == Constructor ==
    /// Creates an engine over `client`.
    ///
    /// # Arguments
    /// * `client` - Command channel to the server
    /// * `consistency` - Strict or lenient normalization
    /// * `default_ttl` - TTL in seconds for writes without one
    pub fn new(
        client: Arc<dyn KeyValueClient>,
        consistency: ConsistencyMode,
        default_ttl: u64,
    ) -> Self {
        let default_ttl = effective_default_ttl(default_ttl);
        info!(?consistency, default_ttl, "Redis cache engine created");
        Self {
            client,
            consistency,
            default_ttl,
        }
    }

    /// Reads the counter at `key`, which must exist and hold an integer.
    async fn current_counter(
        &self,
        ids: CounterIds,
        key: &str,
        delta: i64,
    ) -> CacheResult<i64> {
        let raw = self
            .client
            .get(key)
            .await
            .map_err(|e| backend_failure(ids.backend, key, e))?;

        let Some(raw) = raw else {
            return Err(CacheError::new(ids.missing, ErrorCode::MissingCacheKey)
                .with("key", key)
                .with("by_value", delta));
        };

        raw.trim().parse::<i64>().map_err(|_| {
            CacheError::new(ids.non_numeric, ErrorCode::NonNumericCacheValue)
                .with("key", key)
                .with("value", &raw)
        })
    }
}

struct CounterIds {
    backend: &'static str,
    missing: &'static str,
    non_numeric: &'static str,
}

/// Maps a client failure to the public taxonomy.
fn backend_failure(internal_id: &'static str, key: &str, err: ClientError) -> CacheError {
    warn!(internal_id, key, error = %err, "Redis command failed");
    let code = match err {
        ClientError::NonNumeric(_) => ErrorCode::NonNumericCacheValue,
        _ => ErrorCode::SomethingWentWrong,
    };
    CacheError::new(internal_id, code).with("key", key).caused_by(err)
}

#[async_trait]
impl Cache for RedisCache {
    fn engine(&self) -> Engine {
        Engine::Redis
    }

    fn consistency(&self) -> ConsistencyMode {
        self.consistency
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        require_key("rds.get.1", key)?;
        let raw = self
            .client
            .get(key)
            .await
            .map_err(|e| backend_failure("rds.get.2", key, e))?;
        debug!(key, hit = raw.is_some(), "Cache GET");
        Ok(raw.map(decode))
    }

    async fn get_object(&self, key: &str) -> CacheResult<Option<Value>> {
        require_key("rds.getobj.1", key)?;
        let fields = self
            .client
            .get_hash(key)
            .await
            .map_err(|e| backend_failure("rds.getobj.2", key, e))?;
        debug!(key, hit = !fields.is_empty(), "Cache HGETALL");

        if fields.is_empty() {
            return Ok(None);
        }
        let object: Map<String, Value> = fields
            .into_iter()
            .map(|(field, raw)| (field, decode(raw)))
            .collect();
        Ok(Some(Value::Object(object)))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> CacheResult<()> {
        require_key("rds.set.1", key)?;
        // Structured values only go through set_object
        if !validate_value(&value) || !is_scalar(&value) {
            return Err(CacheError::new("rds.set.2", ErrorCode::InvalidCacheValue)
                .with("key", key)
                .with("value", &value));
        }

        let ttl = effective_ttl(ttl, self.default_ttl);
        self.client
            .set_ex(key, &encode(&value), ttl)
            .await
            .map_err(|e| backend_failure("rds.set.3", key, e))?;
        debug!(key, ttl, "Cache SET");
        Ok(())
    }

    async fn set_object(&self, key: &str, object: Value, ttl: Option<u64>) -> CacheResult<()> {
        require_key("rds.setobj.1", key)?;
        if object.is_array() {
            return Err(CacheError::new("rds.setobj.2", ErrorCode::ArrayIsInvalidCacheValue)
                .with("key", key)
                .with("value", &object));
        }
        let members = match &object {
            Value::Object(members) if validate_value(&object) => members,
            _ => {
                return Err(CacheError::new("rds.setobj.3", ErrorCode::InvalidCacheValue)
                    .with("key", key)
                    .with("value", &object));
            }
        };

        let fields: Vec<(String, String)> = members
            .iter()
            .map(|(field, value)| (field.clone(), encode(value)))
            .collect();
        let ttl = effective_ttl(ttl, self.default_ttl);
        self.client
            .replace_hash(key, fields, ttl)
            .await
            .map_err(|e| backend_failure("rds.setobj.4", key, e))?;
        debug!(key, ttl, "Cache HSET");
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        require_key("rds.del.1", key)?;
        self.client
            .del(key)
            .await
            .map_err(|e| backend_failure("rds.del.2", key, e))?;
        debug!(key, "Cache DEL");
        Ok(())
    }

    async fn multi_get(&self, keys: &[&str]) -> CacheResult<HashMap<String, Option<Value>>> {
        require_keys("rds.mget.1", "rds.mget.2", keys)?;
        let owned: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        let raws = self.client.mget(&owned).await.map_err(|e| {
            backend_failure("rds.mget.3", "", e).with("keys", keys)
        })?;

        let mut values: HashMap<String, Option<Value>> =
            owned.iter().map(|key| (key.clone(), None)).collect();
        for (key, raw) in owned.into_iter().zip(raws) {
            values.insert(key, multi_get_view(raw.map(decode)));
        }
        Ok(values)
    }

    async fn increment(&self, key: &str, by_value: Option<i64>) -> CacheResult<i64> {
        require_key("rds.incr.1", key)?;
        let delta = require_counter_delta("rds.incr.2", key, by_value)?;
        let ids = CounterIds {
            backend: "rds.incr.3",
            missing: "rds.incr.4",
            non_numeric: "rds.incr.5",
        };
        self.current_counter(ids, key, delta).await?;

        let updated = self
            .client
            .incr_by(key, delta)
            .await
            .map_err(|e| backend_failure("rds.incr.6", key, e).with("by_value", delta))?;
        debug!(key, delta, updated, "Cache INCRBY");
        Ok(updated)
    }

    async fn decrement(&self, key: &str, by_value: Option<i64>) -> CacheResult<i64> {
        require_key("rds.decr.1", key)?;
        let delta = require_counter_delta("rds.decr.2", key, by_value)?;
        let ids = CounterIds {
            backend: "rds.decr.3",
            missing: "rds.decr.4",
            non_numeric: "rds.decr.5",
        };
        let current = self.current_counter(ids, key, delta).await?;
        let applied = self.consistency.decrement_delta(current, delta);

        let updated = self
            .client
            .decr_by(key, applied)
            .await
            .map_err(|e| backend_failure("rds.decr.6", key, e).with("by_value", delta))?;
        debug!(key, delta = applied, updated, "Cache DECRBY");
        Ok(updated)
    }

    async fn touch(&self, key: &str, lifetime: i64) -> CacheResult<()> {
        require_key("rds.touch.1", key)?;
        require_lifetime("rds.touch.2", key, lifetime)?;

        // EXPIRE with zero removes the key
        let updated = self
            .client
            .expire(key, lifetime)
            .await
            .map_err(|e| backend_failure("rds.touch.3", key, e))?;
        if !updated {
            return Err(CacheError::new("rds.touch.4", ErrorCode::MissingCacheKey)
                .with("key", key)
                .with("lifetime", lifetime));
        }
        debug!(key, lifetime, "Cache EXPIRE");
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Option<u64>) -> CacheResult<()> {
        require_key("rds.lock.1", key)?;
        let ttl = effective_ttl(ttl, self.default_ttl);

        let acquired = self
            .client
            .set_nx_ex(key, &encode(&Value::from(LOCK_VALUE)), ttl)
            .await
            .map_err(|e| backend_failure("rds.lock.2", key, e))?;
        if !acquired {
            debug!(key, "Lock already held");
            return Err(CacheError::new("rds.lock.3", ErrorCode::AcquireLockFailed)
                .with("key", key)
                .with("ttl", ttl));
        }
        debug!(key, ttl, "Lock acquired");
        Ok(())
    }

    async fn del_all(&self) -> CacheResult<()> {
        self.client.flush_db().await.map_err(|e| {
            warn!(error = %e, "Redis FLUSHDB failed");
            CacheError::new("rds.flush.1", ErrorCode::FlushAllKeysFailed).caused_by(e)
        })?;
        info!("Redis database flushed");
        Ok(())
    }
}
