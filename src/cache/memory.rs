//! In-Memory Engine
//!
//! Process-local engine backed by a HashMap of records. Expired records are
//! dropped lazily when an operation touches their key; nothing sweeps them.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::codec::multi_get_view;
use crate::cache::validate::{
    effective_default_ttl, effective_ttl, require_counter_delta, require_key, require_keys,
    require_lifetime, validate_value,
};
use crate::cache::{Cache, ConsistencyMode, Record, LOCK_VALUE};
use crate::config::Engine;
use crate::error::{CacheError, CacheResult, ErrorCode};

// == In-Memory Cache ==
/// Cache engine that keeps every record inside the current process.
#[derive(Debug)]
pub struct InMemoryCache {
    /// Records by key, including expired ones not yet reclaimed
    records: Mutex<HashMap<String, Record>>,
    consistency: ConsistencyMode,
    /// Default TTL in seconds for writes without an explicit TTL
    default_ttl: u64,
    namespace: String,
}

impl InMemoryCache {
    // == Constructor ==
    /// Creates an empty engine.
    ///
    /// # Arguments
    /// * `namespace` - Label distinguishing independent in-memory engines
    /// * `consistency` - Strict or lenient normalization
    /// * `default_ttl` - TTL in seconds for writes without one
    pub fn new(namespace: impl Into<String>, consistency: ConsistencyMode, default_ttl: u64) -> Self {
        let default_ttl = effective_default_ttl(default_ttl);
        let namespace = namespace.into();
        info!(namespace = %namespace, ?consistency, default_ttl, "In-memory cache engine created");
        Self {
            records: Mutex::new(HashMap::new()),
            consistency,
            default_ttl,
            namespace,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of records held, counting expired ones nobody has touched yet.
    pub fn stored_records(&self) -> usize {
        self.records.lock().len()
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

    fn read(&self, key: &str) -> Option<Value> {
        let mut records = self.records.lock();
        match live_record(&mut records, key) {
            Some(record) => {
                debug!(key, "Cache HIT");
                Some(record.value().clone())
            }
            None => {
                debug!(key, "Cache MISS");
                None
            }
        }
    }

    fn write(&self, key: &str, value: Value, ttl: Option<u64>) {
        let ttl = effective_ttl(ttl, self.default_ttl);
        self.records
            .lock()
            .insert(key.to_string(), Record::new(value, Some(ttl)));
        debug!(key, ttl, "Cache SET");
    }

    /// Applies `delta` to the counter at `key`, creating it first when the
    /// mode allows.
    fn adjust_counter(
        &self,
        ids: CounterIds,
        key: &str,
        delta: i64,
        apply: impl FnOnce(i64, i64) -> Option<i64>,
    ) -> CacheResult<i64> {
        let mut records = self.records.lock();

        if live_record(&mut records, key).is_none() {
            if !self.consistency.auto_creates_counters() {
                return Err(CacheError::new(ids.missing, ErrorCode::MissingCacheKey)
                    .with("key", key)
                    .with("by_value", delta));
            }
            debug!(key, "Creating counter at zero");
        }

        let record = records
            .entry(key.to_string())
            .or_insert_with(|| Record::new(Value::from(0), Some(self.default_ttl)));

        let current = record.value().as_i64().ok_or_else(|| {
            CacheError::new(ids.non_numeric, ErrorCode::NonNumericCacheValue)
                .with("key", key)
                .with("value", record.value())
        })?;

        let updated = apply(current, delta).ok_or_else(|| {
            CacheError::new(ids.overflow, ErrorCode::SomethingWentWrong)
                .with("key", key)
                .with("by_value", delta)
                .caused_by("counter overflow")
        })?;

        record.set_value(Value::from(updated));
        Ok(updated)
    }
}

/// Failure sites of one counter operation.
struct CounterIds {
    missing: &'static str,
    non_numeric: &'static str,
    overflow: &'static str,
}

/// Returns the record at `key` unless it has expired, removing it if so.
fn live_record<'a>(records: &'a mut HashMap<String, Record>, key: &str) -> Option<&'a mut Record> {
    if records.get(key).is_some_and(Record::has_expired) {
        records.remove(key);
        debug!(key, "Reclaimed expired record");
        return None;
    }
    records.get_mut(key)
}

#[async_trait]
impl Cache for InMemoryCache {
    fn engine(&self) -> Engine {
        Engine::InMemory
    }

    fn consistency(&self) -> ConsistencyMode {
        self.consistency
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        require_key("mem.get.1", key)?;
        Ok(self.read(key))
    }

    async fn get_object(&self, key: &str) -> CacheResult<Option<Value>> {
        require_key("mem.getobj.1", key)?;
        Ok(self.read(key))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> CacheResult<()> {
        require_key("mem.set.1", key)?;
        self.check_value("mem.set.2", "mem.set.3", key, &value)?;
        self.write(key, value, ttl);
        Ok(())
    }

    async fn set_object(&self, key: &str, object: Value, ttl: Option<u64>) -> CacheResult<()> {
        require_key("mem.setobj.1", key)?;
        if !object.is_object() && !object.is_array() {
            return Err(CacheError::new("mem.setobj.2", ErrorCode::InvalidCacheValue)
                .with("key", key)
                .with("value", &object));
        }
        self.check_value("mem.setobj.3", "mem.setobj.4", key, &object)?;
        self.write(key, object, ttl);
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        require_key("mem.del.1", key)?;
        let removed = self.records.lock().remove(key).is_some();
        debug!(key, removed, "Cache DEL");
        Ok(())
    }

    async fn multi_get(&self, keys: &[&str]) -> CacheResult<HashMap<String, Option<Value>>> {
        require_keys("mem.mget.1", "mem.mget.2", keys)?;
        let mut records = self.records.lock();
        let values = keys
            .iter()
            .map(|key| {
                let value = live_record(&mut records, key).map(|record| record.value().clone());
                (key.to_string(), multi_get_view(value))
            })
            .collect();
        Ok(values)
    }

    async fn increment(&self, key: &str, by_value: Option<i64>) -> CacheResult<i64> {
        require_key("mem.incr.1", key)?;
        let delta = require_counter_delta("mem.incr.2", key, by_value)?;
        let ids = CounterIds {
            missing: "mem.incr.3",
            non_numeric: "mem.incr.4",
            overflow: "mem.incr.5",
        };
        self.adjust_counter(ids, key, delta, i64::checked_add)
    }

    async fn decrement(&self, key: &str, by_value: Option<i64>) -> CacheResult<i64> {
        require_key("mem.decr.1", key)?;
        let delta = require_counter_delta("mem.decr.2", key, by_value)?;
        let ids = CounterIds {
            missing: "mem.decr.3",
            non_numeric: "mem.decr.4",
            overflow: "mem.decr.5",
        };
        let mode = self.consistency;
        self.adjust_counter(ids, key, delta, |current, delta| {
            current.checked_sub(mode.decrement_delta(current, delta))
        })
    }

    async fn touch(&self, key: &str, lifetime: i64) -> CacheResult<()> {
        require_key("mem.touch.1", key)?;
        require_lifetime("mem.touch.2", key, lifetime)?;

        let mut records = self.records.lock();
        let Some(record) = live_record(&mut records, key) else {
            return Err(CacheError::new("mem.touch.3", ErrorCode::MissingCacheKey)
                .with("key", key)
                .with("lifetime", lifetime));
        };
        if lifetime > 0 {
            record.set_expiry(lifetime);
        } else {
            records.remove(key);
        }
        debug!(key, lifetime, "Cache TOUCH");
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Option<u64>) -> CacheResult<()> {
        require_key("mem.lock.1", key)?;
        let ttl = effective_ttl(ttl, self.default_ttl);

        let mut records = self.records.lock();
        if live_record(&mut records, key).is_some() {
            debug!(key, "Lock already held");
            return Err(CacheError::new("mem.lock.2", ErrorCode::AcquireLockFailed)
                .with("key", key)
                .with("ttl", ttl));
        }
        records.insert(key.to_string(), Record::new(Value::from(LOCK_VALUE), Some(ttl)));
        debug!(key, ttl, "Lock acquired");
        Ok(())
    }

    async fn del_all(&self) -> CacheResult<()> {
        Err(CacheError::new("mem.flush.1", ErrorCode::FlushAllNotSupported)
            .with("namespace", &self.namespace))
    }
}
