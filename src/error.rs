//! Error types for the cache layer
//!
//! Provides the failure taxonomy shared by every engine, plus the
//! construction and remote-client errors, using thiserror.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

// == Error Code Enum ==
/// Public error identifiers carried by every failed cache operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidCacheKey,
    InvalidCacheValue,
    ArrayIsInvalidCacheValue,
    NonIntCacheValue,
    NonNumericCacheValue,
    CacheExpiryNan,
    MissingCacheKey,
    AcquireLockFailed,
    CacheKeysNonArray,
    FlushAllNotSupported,
    FlushAllKeysFailed,
    SomethingWentWrong,
}

impl ErrorCode {
    /// Returns the wire identifier, e.g. `invalid_cache_key`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCacheKey => "invalid_cache_key",
            ErrorCode::InvalidCacheValue => "invalid_cache_value",
            ErrorCode::ArrayIsInvalidCacheValue => "array_is_invalid_cache_value",
            ErrorCode::NonIntCacheValue => "non_int_cache_value",
            ErrorCode::NonNumericCacheValue => "non_numeric_cache_value",
            ErrorCode::CacheExpiryNan => "cache_expiry_nan",
            ErrorCode::MissingCacheKey => "missing_cache_key",
            ErrorCode::AcquireLockFailed => "acquire_lock_failed",
            ErrorCode::CacheKeysNonArray => "cache_keys_non_array",
            ErrorCode::FlushAllNotSupported => "flush_all_not_supported",
            ErrorCode::FlushAllKeysFailed => "flush_all_keys_failed",
            ErrorCode::SomethingWentWrong => "something_went_wrong",
        }
    }

    /// Returns the human-readable message for this code.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCacheKey => {
                "Cache key must be non-empty, at most 250 bytes and free of whitespace"
            }
            ErrorCode::InvalidCacheValue => "Cache value is missing, too large or of a type this engine cannot store",
            ErrorCode::ArrayIsInvalidCacheValue => "Arrays cannot be stored as cache values",
            ErrorCode::NonIntCacheValue => "Counter delta must be a positive integer",
            ErrorCode::NonNumericCacheValue => "Stored value is not an integer",
            ErrorCode::CacheExpiryNan => "Cache lifetime must be a non-negative integer",
            ErrorCode::MissingCacheKey => "Cache key does not exist",
            ErrorCode::AcquireLockFailed => "Lock is already held",
            ErrorCode::CacheKeysNonArray => "Cache keys must be a non-empty list",
            ErrorCode::FlushAllNotSupported => "Flushing all keys is not supported by this engine",
            ErrorCode::FlushAllKeysFailed => "Flushing all keys failed",
            ErrorCode::SomethingWentWrong => "Cache backend failure",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Cache Error ==
/// Structured failure returned by every cache operation.
///
/// `internal_id` pins the exact failure site for correlation, `code` is the
/// public identifier, and `debug` holds the inputs that produced the failure.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{} ({}): {}", .code, .internal_id, .code.message())]
pub struct CacheError {
    pub internal_id: &'static str,
    pub code: ErrorCode,
    pub debug: Map<String, Value>,
}

impl CacheError {
    // == Constructor ==
    /// Creates an error with an empty debug context.
    pub fn new(internal_id: &'static str, code: ErrorCode) -> Self {
        Self {
            internal_id,
            code,
            debug: Map::new(),
        }
    }

    /// Adds one entry to the debug context.
    pub fn with(mut self, name: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.debug.insert(name.to_string(), value);
        self
    }

    /// Attaches the underlying backend cause.
    pub fn caused_by(self, cause: impl fmt::Display) -> Self {
        self.with("error", cause.to_string())
    }

    /// Returns the public error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

// == Config Error ==
/// Fatal configuration problems raised while constructing an engine.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No engine was named
    #[error("Cache engine parameter is missing")]
    MissingEngine,

    /// The engine name is not one of redis, memcached or none
    #[error("Unknown cache engine: {0}")]
    UnknownEngine(String),

    /// A connection parameter the engine requires is absent
    #[error("{engine} - mandatory connection parameter missing: {parameter}")]
    MissingParameter {
        engine: &'static str,
        parameter: &'static str,
    },

    /// The remote client could not be built from the parameters
    #[error("Failed to build {engine} client: {reason}")]
    Client { engine: &'static str, reason: String },
}

// == Client Error ==
/// Failures reported by the remote clients behind the Redis and Memcached engines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Failed to connect to the backend
    #[error("Cache connection error: {0}")]
    Connection(String),

    /// The backend refused a counter command on a non-integer value
    #[error("Value is not an integer: {0}")]
    NonNumeric(String),

    /// Any other backend failure
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Result type for remote client calls.
pub type ClientResult<T> = std::result::Result<T, ClientError>;
