//! Engine Registry
//!
//! Hands out one shared engine per configuration fingerprint, so identical
//! configurations reuse the same connections. The registry is an ordinary
//! value owned by whoever composes the application.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cache::{Cache, InMemoryCache, MemcachedCache, RedisCache};
use crate::client::{MemcachedClient, RedisClient};
use crate::config::{CacheConfig, Endpoint, EngineSettings};
use crate::error::ConfigError;

// == Cache Registry ==
/// Memoizing engine factory keyed by configuration fingerprint.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    instances: Mutex<HashMap<String, Arc<dyn Cache>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // == Instance ==
    /// Returns the engine for `config`, building it on first request.
    ///
    /// Fails when the engine is unknown or a mandatory connection parameter
    /// is missing. No network I/O happens here; remote engines connect on
    /// their first operation.
    pub fn instance(&self, config: &CacheConfig) -> Result<Arc<dyn Cache>, ConfigError> {
        let settings = config.resolve()?;
        let fingerprint = settings.fingerprint();

        let mut instances = self.instances.lock();
        if let Some(existing) = instances.get(&fingerprint) {
            debug!(fingerprint = %fingerprint, "Reusing cache engine");
            return Ok(Arc::clone(existing));
        }

        let cache = build(&settings)?;
        info!(fingerprint = %fingerprint, engine = %settings.engine, "Cache engine registered");
        instances.insert(fingerprint, Arc::clone(&cache));
        Ok(cache)
    }

    /// Number of distinct engines built so far.
    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }
}

fn build(settings: &EngineSettings) -> Result<Arc<dyn Cache>, ConfigError> {
    let cache: Arc<dyn Cache> = match &settings.endpoint {
        Endpoint::Redis(endpoint) => Arc::new(RedisCache::new(
            Arc::new(RedisClient::new(endpoint)?),
            settings.consistency,
            settings.default_ttl,
        )),
        Endpoint::Memcached { servers } => Arc::new(MemcachedCache::new(
            Arc::new(MemcachedClient::new(servers)?),
            settings.consistency,
            settings.default_ttl,
        )),
        Endpoint::InMemory { namespace } => Arc::new(InMemoryCache::new(
            namespace.clone(),
            settings.consistency,
            settings.default_ttl,
        )),
    };
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ConsistencyMode;
    use crate::config::Engine;

    #[test]
    fn test_same_config_shares_instance() {
        let registry = CacheRegistry::new();
        let a = registry.instance(&CacheConfig::in_memory()).unwrap();
        let b = registry.instance(&CacheConfig::in_memory()).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_mode_and_namespace_split_instances() {
        let registry = CacheRegistry::new();
        let strict = registry.instance(&CacheConfig::in_memory()).unwrap();
        let lenient = registry
            .instance(&CacheConfig::in_memory().with_consistency(false))
            .unwrap();
        let other = registry
            .instance(&CacheConfig::in_memory().with_namespace("jobs"))
            .unwrap();

        assert_eq!(strict.consistency(), ConsistencyMode::Strict);
        assert_eq!(lenient.consistency(), ConsistencyMode::Lenient);
        assert!(!Arc::ptr_eq(&strict, &other));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_remote_engines_build_without_connecting() {
        let registry = CacheRegistry::new();
        let redis = registry.instance(&CacheConfig::redis("127.0.0.1", 6379)).unwrap();
        let memcached = registry
            .instance(&CacheConfig::memcached(["127.0.0.1:11211"]))
            .unwrap();

        assert_eq!(redis.engine(), Engine::Redis);
        assert_eq!(memcached.engine(), Engine::Memcached);
    }

    #[test]
    fn test_invalid_config_registers_nothing() {
        let registry = CacheRegistry::new();
        let mut config = CacheConfig::redis("127.0.0.1", 6379);
        config.enable_tls = None;

        assert!(registry.instance(&config).is_err());
        assert!(registry.is_empty());
    }
}
