//! Input validation
//!
//! Pure checks on keys, values, TTLs and counter arguments. Every engine runs
//! these before touching storage.

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{DEFAULT_COUNTER_DELTA, MAX_KEY_LENGTH, MAX_VALUE_SIZE};
use crate::config::DEFAULT_TTL;
use crate::error::{CacheError, CacheResult, ErrorCode};

// == Keys ==
/// Checks that a key is non-empty, at most 250 UTF-8 bytes and contains no
/// whitespace.
pub fn validate_key(key: &str) -> bool {
    if key.is_empty() {
        debug!("Cache key should not be blank");
        return false;
    }

    if key.len() > MAX_KEY_LENGTH {
        debug!(size = key.len(), "Cache key byte size exceeds {}", MAX_KEY_LENGTH);
        return false;
    }

    if key.chars().any(char::is_whitespace) {
        debug!(key = key, "Cache key has unsupported chars");
        return false;
    }

    true
}

// == Values ==
/// Byte length of the canonical JSON serialization of `value`.
pub fn serialized_size(value: &Value) -> usize {
    value.to_string().len()
}

/// Checks that a value is present and serializes to at most 1 MiB.
///
/// `Null` stands for an absent value and is never storable.
pub fn validate_value(value: &Value) -> bool {
    !value.is_null() && serialized_size(value) <= MAX_VALUE_SIZE
}

/// True for values that are neither objects nor arrays.
pub fn is_scalar(value: &Value) -> bool {
    !value.is_object() && !value.is_array()
}

// == Lifetimes ==
/// Checks that an explicit TTL was supplied.
///
/// A missing or zero TTL is not an error; callers substitute the default.
pub fn validate_ttl(ttl: Option<u64>) -> bool {
    matches!(ttl, Some(seconds) if seconds > 0)
}

/// Resolves the TTL to apply, falling back to `default_ttl`.
pub fn effective_ttl(ttl: Option<u64>, default_ttl: u64) -> u64 {
    match ttl {
        Some(seconds) if validate_ttl(ttl) => seconds,
        _ => default_ttl,
    }
}

/// Default TTL an engine runs with; zero falls back to `DEFAULT_TTL`.
pub fn effective_default_ttl(default_ttl: u64) -> u64 {
    if default_ttl > 0 {
        default_ttl
    } else {
        DEFAULT_TTL
    }
}

/// Checks a `touch` lifetime: a non-negative number of seconds.
pub fn validate_lifetime(lifetime: i64) -> bool {
    lifetime >= 0
}

// == Counters ==
/// Checks an increment/decrement delta: a positive integer.
pub fn validate_counter_delta(by_value: i64) -> bool {
    by_value >= 1
}

// == Guards ==
// Engines call these first so a rejected input never reaches storage.

pub(crate) fn require_key(internal_id: &'static str, key: &str) -> CacheResult<()> {
    if validate_key(key) {
        Ok(())
    } else {
        warn!(internal_id, key, "Invalid cache key");
        Err(CacheError::new(internal_id, ErrorCode::InvalidCacheKey).with("key", key))
    }
}

pub(crate) fn require_keys(
    empty_id: &'static str,
    key_id: &'static str,
    keys: &[&str],
) -> CacheResult<()> {
    if keys.is_empty() {
        warn!(internal_id = empty_id, "Empty cache key list");
        return Err(CacheError::new(empty_id, ErrorCode::CacheKeysNonArray).with("keys", keys));
    }
    match keys.iter().find(|key| !validate_key(key)) {
        Some(key) => {
            warn!(internal_id = key_id, key = *key, "Invalid cache key in list");
            Err(CacheError::new(key_id, ErrorCode::InvalidCacheKey)
                .with("key", key)
                .with("keys", keys))
        }
        None => Ok(()),
    }
}

/// Resolves the counter delta, rejecting anything below one.
pub(crate) fn require_counter_delta(
    internal_id: &'static str,
    key: &str,
    by_value: Option<i64>,
) -> CacheResult<i64> {
    let delta = by_value.unwrap_or(DEFAULT_COUNTER_DELTA);
    if validate_counter_delta(delta) {
        Ok(delta)
    } else {
        Err(CacheError::new(internal_id, ErrorCode::NonIntCacheValue)
            .with("key", key)
            .with("by_value", delta))
    }
}

pub(crate) fn require_lifetime(internal_id: &'static str, key: &str, lifetime: i64) -> CacheResult<()> {
    if validate_lifetime(lifetime) {
        Ok(())
    } else {
        Err(CacheError::new(internal_id, ErrorCode::CacheExpiryNan)
            .with("key", key)
            .with("lifetime", lifetime))
    }
}
