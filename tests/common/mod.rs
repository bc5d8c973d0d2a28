//! In-process stand-ins for the Redis and Memcached servers.
//!
//! Each fake reproduces the native command semantics the engines rely on,
//! including expiry, and can be switched into a failing state.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;

use polycache::cache::{Cache, InMemoryCache, MemcachedCache, RedisCache};
use polycache::client::{DistributedCacheClient, KeyValueClient};
use polycache::error::{ClientError, ClientResult};
use polycache::ConsistencyMode;

pub const TEST_DEFAULT_TTL: u64 = 300;

fn refused() -> ClientError {
    ClientError::Connection("connection refused".to_string())
}

// == Fake Redis ==
#[derive(Debug, Clone, PartialEq)]
pub enum RedisData {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct RedisEntry {
    data: RedisData,
    expires_at: Option<Instant>,
}

impl RedisEntry {
    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

#[derive(Debug, Default)]
pub struct FakeRedis {
    entries: Mutex<HashMap<String, RedisEntry>>,
    failing: AtomicBool,
}

impl FakeRedis {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Raw stored data, bypassing the engine.
    pub fn raw(&self, key: &str) -> Option<RedisData> {
        let mut entries = self.entries.lock();
        live(&mut entries, key).map(|entry| entry.data.clone())
    }

    /// Writes a raw string, as another client of the same server would.
    pub fn put_raw(&self, key: &str, value: &str) {
        self.entries.lock().insert(
            key.to_string(),
            RedisEntry {
                data: RedisData::Str(value.to_string()),
                expires_at: None,
            },
        );
    }

    /// Remaining lifetime of `key`, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut entries = self.entries.lock();
        live(&mut entries, key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn check(&self) -> ClientResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(refused())
        } else {
            Ok(())
        }
    }

    fn adjust(&self, key: &str, delta: i64) -> ClientResult<i64> {
        self.check()?;
        let mut entries = self.entries.lock();
        let current = match live(&mut entries, key).map(|entry| entry.data.clone()) {
            None => 0,
            Some(RedisData::Str(text)) => text.parse::<i64>().map_err(|_| {
                ClientError::NonNumeric("ERR value is not an integer or out of range".into())
            })?,
            Some(RedisData::Hash(_)) => return Err(wrong_type()),
        };
        let updated = current
            .checked_add(delta)
            .ok_or_else(|| ClientError::Backend("ERR increment or decrement would overflow".into()))?;

        let expires_at = entries.get(key).and_then(|entry| entry.expires_at);
        entries.insert(
            key.to_string(),
            RedisEntry {
                data: RedisData::Str(updated.to_string()),
                expires_at,
            },
        );
        Ok(updated)
    }
}

fn wrong_type() -> ClientError {
    ClientError::Backend(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    )
}

fn live<'a>(entries: &'a mut HashMap<String, RedisEntry>, key: &str) -> Option<&'a mut RedisEntry> {
    if entries.get(key).is_some_and(|entry| !entry.is_live()) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn deadline(ttl_secs: u64) -> Option<Instant> {
    Some(Instant::now() + Duration::from_secs(ttl_secs))
}

#[async_trait]
impl KeyValueClient for FakeRedis {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        self.check()?;
        let mut entries = self.entries.lock();
        match live(&mut entries, key).map(|entry| entry.data.clone()) {
            None => Ok(None),
            Some(RedisData::Str(text)) => Ok(Some(text)),
            Some(RedisData::Hash(_)) => Err(wrong_type()),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> ClientResult<()> {
        self.check()?;
        if ttl_secs == 0 {
            return Err(ClientError::Backend("ERR invalid expire time in 'set' command".into()));
        }
        self.entries.lock().insert(
            key.to_string(),
            RedisEntry {
                data: RedisData::Str(value.to_string()),
                expires_at: deadline(ttl_secs),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> ClientResult<bool> {
        self.check()?;
        if ttl_secs == 0 {
            return Err(ClientError::Backend("ERR invalid expire time in 'set' command".into()));
        }
        let mut entries = self.entries.lock();
        if live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            RedisEntry {
                data: RedisData::Str(value.to_string()),
                expires_at: deadline(ttl_secs),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> ClientResult<()> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> ClientResult<Vec<Option<String>>> {
        self.check()?;
        let mut entries = self.entries.lock();
        Ok(keys
            .iter()
            .map(|key| match live(&mut entries, key).map(|entry| &entry.data) {
                Some(RedisData::Str(text)) => Some(text.clone()),
                _ => None,
            })
            .collect())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> ClientResult<i64> {
        self.adjust(key, delta)
    }

    async fn decr_by(&self, key: &str, delta: i64) -> ClientResult<i64> {
        self.adjust(key, -delta)
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> ClientResult<bool> {
        self.check()?;
        let mut entries = self.entries.lock();
        if live(&mut entries, key).is_none() {
            return Ok(false);
        }
        if ttl_secs <= 0 {
            entries.remove(key);
        } else if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = deadline(ttl_secs.unsigned_abs());
        }
        Ok(true)
    }

    async fn replace_hash(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
        ttl_secs: u64,
    ) -> ClientResult<()> {
        self.check()?;
        let mut entries = self.entries.lock();
        entries.remove(key);
        if !fields.is_empty() {
            entries.insert(
                key.to_string(),
                RedisEntry {
                    data: RedisData::Hash(fields.into_iter().collect()),
                    expires_at: deadline(ttl_secs),
                },
            );
        }
        Ok(())
    }

    async fn get_hash(&self, key: &str) -> ClientResult<HashMap<String, String>> {
        self.check()?;
        let mut entries = self.entries.lock();
        match live(&mut entries, key).map(|entry| entry.data.clone()) {
            None => Ok(HashMap::new()),
            Some(RedisData::Hash(fields)) => Ok(fields),
            Some(RedisData::Str(_)) => Err(wrong_type()),
        }
    }

    async fn flush_db(&self) -> ClientResult<()> {
        self.check()?;
        self.entries.lock().clear();
        Ok(())
    }
}

// == Fake Memcached ==
const THIRTY_DAYS: u32 = 60 * 60 * 24 * 30;

#[derive(Debug, Clone)]
struct MemcachedItem {
    value: String,
    /// Expiration exactly as sent by the client
    expiration: u32,
    expires_at: Option<Instant>,
}

impl MemcachedItem {
    fn new(value: &str, expiration: u32) -> Self {
        Self {
            value: value.to_string(),
            expiration,
            expires_at: memcached_deadline(expiration),
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

fn memcached_deadline(expiration: u32) -> Option<Instant> {
    if expiration == 0 {
        return None;
    }
    let relative = if expiration > THIRTY_DAYS {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        u64::from(expiration).saturating_sub(now)
    } else {
        u64::from(expiration)
    };
    Some(Instant::now() + Duration::from_secs(relative))
}

#[derive(Debug, Default)]
pub struct FakeMemcached {
    items: Mutex<HashMap<String, MemcachedItem>>,
    failing: AtomicBool,
}

impl FakeMemcached {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        let mut items = self.items.lock();
        live_item(&mut items, key).map(|item| item.value.clone())
    }

    pub fn put_raw(&self, key: &str, value: &str) {
        self.items
            .lock()
            .insert(key.to_string(), MemcachedItem::new(value, 0));
    }

    /// Expiration value last sent for `key`.
    pub fn expiration(&self, key: &str) -> Option<u32> {
        let mut items = self.items.lock();
        live_item(&mut items, key).map(|item| item.expiration)
    }

    fn check(&self) -> ClientResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(refused())
        } else {
            Ok(())
        }
    }

    fn adjust(&self, key: &str, delta: u64, decrement: bool) -> ClientResult<Option<u64>> {
        self.check()?;
        let mut items = self.items.lock();
        let Some(item) = live_item(&mut items, key) else {
            return Ok(None);
        };
        let current = item.value.trim().parse::<u64>().map_err(|_| {
            ClientError::NonNumeric(
                "CLIENT_ERROR cannot increment or decrement non-numeric value".into(),
            )
        })?;
        let updated = if decrement {
            current.saturating_sub(delta)
        } else {
            current.wrapping_add(delta)
        };
        item.value = updated.to_string();
        Ok(Some(updated))
    }
}

fn live_item<'a>(
    items: &'a mut HashMap<String, MemcachedItem>,
    key: &str,
) -> Option<&'a mut MemcachedItem> {
    if items.get(key).is_some_and(|item| !item.is_live()) {
        items.remove(key);
    }
    items.get_mut(key)
}

#[async_trait]
impl DistributedCacheClient for FakeMemcached {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        self.check()?;
        Ok(self.raw(key))
    }

    async fn get_multi(&self, keys: &[String]) -> ClientResult<HashMap<String, String>> {
        self.check()?;
        let mut items = self.items.lock();
        Ok(keys
            .iter()
            .filter_map(|key| {
                live_item(&mut items, key).map(|item| (key.clone(), item.value.clone()))
            })
            .collect())
    }

    async fn set(&self, key: &str, value: &str, expiration: u32) -> ClientResult<()> {
        self.check()?;
        self.items
            .lock()
            .insert(key.to_string(), MemcachedItem::new(value, expiration));
        Ok(())
    }

    async fn add(&self, key: &str, value: &str, expiration: u32) -> ClientResult<bool> {
        self.check()?;
        let mut items = self.items.lock();
        if live_item(&mut items, key).is_some() {
            return Ok(false);
        }
        items.insert(key.to_string(), MemcachedItem::new(value, expiration));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> ClientResult<bool> {
        self.check()?;
        let mut items = self.items.lock();
        let existed = live_item(&mut items, key).is_some();
        items.remove(key);
        Ok(existed)
    }

    async fn incr(&self, key: &str, delta: u64) -> ClientResult<Option<u64>> {
        self.adjust(key, delta, false)
    }

    async fn decr(&self, key: &str, delta: u64) -> ClientResult<Option<u64>> {
        self.adjust(key, delta, true)
    }

    async fn touch(&self, key: &str, expiration: u32) -> ClientResult<bool> {
        self.check()?;
        let mut items = self.items.lock();
        let Some(item) = live_item(&mut items, key) else {
            return Ok(false);
        };
        item.expiration = expiration;
        item.expires_at = memcached_deadline(expiration);
        Ok(true)
    }

    async fn flush(&self) -> ClientResult<()> {
        self.check()?;
        self.items.lock().clear();
        Ok(())
    }
}

// == Engine Builders ==
pub fn redis_engine(consistency: ConsistencyMode) -> (RedisCache, Arc<FakeRedis>) {
    let server = FakeRedis::new();
    let cache = RedisCache::new(server.clone(), consistency, TEST_DEFAULT_TTL);
    (cache, server)
}

pub fn memcached_engine(consistency: ConsistencyMode) -> (MemcachedCache, Arc<FakeMemcached>) {
    let server = FakeMemcached::new();
    let cache = MemcachedCache::new(server.clone(), consistency, TEST_DEFAULT_TTL);
    (cache, server)
}

pub fn memory_engine(consistency: ConsistencyMode) -> InMemoryCache {
    InMemoryCache::new("tests", consistency, TEST_DEFAULT_TTL)
}

/// One engine of each kind, labelled for assertion messages.
pub fn all_engines(consistency: ConsistencyMode) -> Vec<(&'static str, Arc<dyn Cache>)> {
    let memory: Arc<dyn Cache> = Arc::new(memory_engine(consistency));
    let redis: Arc<dyn Cache> = Arc::new(redis_engine(consistency).0);
    let memcached: Arc<dyn Cache> = Arc::new(memcached_engine(consistency).0);
    vec![("memory", memory), ("redis", redis), ("memcached", memcached)]
}
