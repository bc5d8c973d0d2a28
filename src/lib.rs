//! Polycache - one cache interface over Redis, Memcached and in-process storage
//!
//! Engines share the `Cache` operation set and a consistency mode that either
//! forces the strictest common behaviour or lets each backend's native
//! semantics through.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod shell;

pub use cache::{Cache, ConsistencyMode};
pub use config::{CacheConfig, Engine};
pub use error::{CacheError, CacheResult, ConfigError, ErrorCode};
pub use registry::CacheRegistry;
