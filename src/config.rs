//! Configuration Module
//!
//! Engine selection and connection parameters, loaded from a JSON-style
//! strategy object or from environment variables, and resolved into the
//! validated settings an engine is built from.

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::cache::ConsistencyMode;
use crate::error::ConfigError;

/// Default TTL in seconds when none is configured
pub const DEFAULT_TTL: u64 = 300;

/// Namespace used by in-memory engines configured without one
pub const DEFAULT_NAMESPACE: &str = "default";

// == Engine ==
/// Backend behind a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Redis,
    Memcached,
    /// Process-local storage, configured as `none`
    InMemory,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Redis => "redis",
            Engine::Memcached => "memcached",
            Engine::InMemory => "none",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(Engine::Redis),
            "memcached" => Ok(Engine::Memcached),
            "none" => Ok(Engine::InMemory),
            other => Err(ConfigError::UnknownEngine(other.to_string())),
        }
    }
}

// == Cache Config ==
/// Unvalidated cache configuration.
///
/// Field names follow the camelCase strategy-object format, e.g.
/// `{"engine": "redis", "consistentBehavior": false, "host": "..."}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// `redis`, `memcached` or `none`
    pub engine: Option<String>,
    /// Strict normalization when true (the default)
    pub consistent_behavior: Option<bool>,
    /// TTL in seconds for writes without one
    pub default_ttl: Option<u64>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Redis password; an empty string means no authentication
    pub password: Option<String>,
    pub enable_tls: Option<bool>,
    /// Memcached servers as `host:port`
    pub servers: Option<Vec<String>>,
    /// Label distinguishing in-memory engines
    pub namespace: Option<String>,
}

impl CacheConfig {
    /// In-memory engine in the default namespace.
    pub fn in_memory() -> Self {
        Self {
            engine: Some(Engine::InMemory.as_str().to_string()),
            ..Self::default()
        }
    }

    /// Redis engine without password or TLS.
    pub fn redis(host: impl Into<String>, port: u16) -> Self {
        Self {
            engine: Some(Engine::Redis.as_str().to_string()),
            host: Some(host.into()),
            port: Some(port),
            password: Some(String::new()),
            enable_tls: Some(false),
            ..Self::default()
        }
    }

    pub fn memcached<S: Into<String>>(servers: impl IntoIterator<Item = S>) -> Self {
        Self {
            engine: Some(Engine::Memcached.as_str().to_string()),
            servers: Some(servers.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_consistency(mut self, consistent: bool) -> Self {
        self.consistent_behavior = Some(consistent);
        self
    }

    pub fn with_default_ttl(mut self, default_ttl: u64) -> Self {
        self.default_ttl = Some(default_ttl);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_tls(mut self, enable_tls: bool) -> Self {
        self.enable_tls = Some(enable_tls);
        self
    }

    /// Creates a config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_ENGINE` - `redis`, `memcached` or `none` (default: none)
    /// - `CACHE_CONSISTENT_BEHAVIOR` - `0`/`false` selects lenient mode (default: strict)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `REDIS_HOST`, `REDIS_PORT` - Redis address
    /// - `REDIS_PASSWORD` - Redis password (default: empty)
    /// - `REDIS_TLS_ENABLED` - Connect with TLS (default: false)
    /// - `MEMCACHE_SERVERS` - Comma-separated `host:port` list
    /// - `CACHE_NAMESPACE` - In-memory namespace (default: default)
    pub fn from_env() -> Self {
        Self {
            engine: Some(
                env::var("CACHE_ENGINE").unwrap_or_else(|_| Engine::InMemory.as_str().to_string()),
            ),
            consistent_behavior: Some(
                env::var("CACHE_CONSISTENT_BEHAVIOR")
                    .ok()
                    .and_then(|v| parse_flag(&v))
                    .unwrap_or(true),
            ),
            default_ttl: Some(
                env::var("DEFAULT_TTL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_TTL),
            ),
            host: env::var("REDIS_HOST").ok(),
            port: env::var("REDIS_PORT").ok().and_then(|v| v.parse().ok()),
            password: Some(env::var("REDIS_PASSWORD").unwrap_or_default()),
            enable_tls: Some(
                env::var("REDIS_TLS_ENABLED")
                    .ok()
                    .and_then(|v| parse_flag(&v))
                    .unwrap_or(false),
            ),
            servers: env::var("MEMCACHE_SERVERS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect()),
            namespace: env::var("CACHE_NAMESPACE").ok(),
        }
    }

    // == Resolve ==
    /// Validates the configuration for the selected engine.
    ///
    /// Redis requires host, port, password (possibly empty) and the TLS flag;
    /// Memcached requires at least one server.
    pub fn resolve(&self) -> Result<EngineSettings, ConfigError> {
        let engine: Engine = self
            .engine
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or(ConfigError::MissingEngine)?
            .parse()?;

        let endpoint = match engine {
            Engine::Redis => {
                let missing = |parameter: &'static str| ConfigError::MissingParameter {
                    engine: "redis",
                    parameter,
                };
                Endpoint::Redis(RedisEndpoint {
                    host: self
                        .host
                        .as_deref()
                        .map(str::trim)
                        .filter(|host| !host.is_empty())
                        .ok_or_else(|| missing("host"))?
                        .to_string(),
                    port: self.port.ok_or_else(|| missing("port"))?,
                    password: self.password.clone().ok_or_else(|| missing("password"))?,
                    tls: self.enable_tls.ok_or_else(|| missing("enableTls"))?,
                })
            }
            Engine::Memcached => {
                let servers: Vec<String> = self
                    .servers
                    .iter()
                    .flatten()
                    .map(|server| server.trim().to_string())
                    .filter(|server| !server.is_empty())
                    .collect();
                if servers.is_empty() {
                    return Err(ConfigError::MissingParameter {
                        engine: "memcached",
                        parameter: "servers",
                    });
                }
                Endpoint::Memcached { servers }
            }
            Engine::InMemory => Endpoint::InMemory {
                namespace: self
                    .namespace
                    .clone()
                    .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            },
        };

        Ok(EngineSettings {
            engine,
            consistency: ConsistencyMode::from_flag(self.consistent_behavior.unwrap_or(true)),
            // Zero would mean "expire at once" on Redis but "never" elsewhere
            default_ttl: self.default_ttl.filter(|ttl| *ttl > 0).unwrap_or(DEFAULT_TTL),
            endpoint,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// == Endpoints ==
/// Redis connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct RedisEndpoint {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub tls: bool,
}

impl fmt::Debug for RedisEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("tls", &self.tls)
            .finish()
    }
}

/// Where an engine stores its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Redis(RedisEndpoint),
    Memcached { servers: Vec<String> },
    InMemory { namespace: String },
}

impl Endpoint {
    /// Stable text identifying the endpoint inside a fingerprint.
    pub fn descriptor(&self) -> String {
        match self {
            Endpoint::Redis(redis) => {
                format!("{}:{}:{}", redis.host.to_lowercase(), redis.port, redis.tls)
            }
            Endpoint::Memcached { servers } => {
                let mut normalized: Vec<String> = servers
                    .iter()
                    .map(|server| server.trim().to_lowercase())
                    .collect();
                normalized.sort();
                normalized.join(",")
            }
            Endpoint::InMemory { namespace } => namespace.clone(),
        }
    }
}

// == Engine Settings ==
/// Validated configuration for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub engine: Engine,
    pub consistency: ConsistencyMode,
    pub default_ttl: u64,
    pub endpoint: Endpoint,
}

impl EngineSettings {
    /// `engine-strict-descriptor`, identical for configurations that would
    /// build interchangeable engines.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}-{}-{}",
            self.engine,
            self.consistency.as_flag(),
            self.endpoint.descriptor()
        )
    }
}
