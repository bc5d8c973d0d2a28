//! Cache Record Module
//!
//! Value plus absolute expiry, as held by the in-memory engine.

use serde_json::Value;

/// Lifetime given to records created without one: twenty years.
const FAR_FUTURE_MS: i64 = 1000 * 60 * 60 * 24 * 365 * 20;

// == Record ==
/// A stored value and the wall-clock time at which it stops being visible.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    value: Value,
    /// Expiration timestamp (Unix milliseconds)
    expires_at: i64,
}

impl Record {
    // == Constructor ==
    /// Creates a record expiring `lifetime_secs` from now.
    ///
    /// A missing or zero lifetime means the record effectively never expires.
    pub fn new(value: Value, lifetime_secs: Option<u64>) -> Self {
        let mut record = Self {
            value,
            expires_at: current_timestamp_ms().saturating_add(FAR_FUTURE_MS),
        };
        if let Some(lifetime) = lifetime_secs.filter(|secs| *secs > 0) {
            record.set_expiry(i64::try_from(lifetime).unwrap_or(i64::MAX));
        }
        record
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn set_value(&mut self, value: Value) {
        self.value = value;
    }

    /// Returns the expiration timestamp in Unix milliseconds.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    // == Set Expiry ==
    /// Moves the expiry to `ttl_secs` from now.
    ///
    /// Zero or negative lifetimes expire the record immediately.
    pub fn set_expiry(&mut self, ttl_secs: i64) {
        let now = current_timestamp_ms();
        self.expires_at = if ttl_secs <= 0 {
            now
        } else {
            now.saturating_add(ttl_secs.saturating_mul(1000))
        };
    }

    // == Has Expired ==
    /// A record is expired once the current time reaches its expiry.
    pub fn has_expired(&self) -> bool {
        current_timestamp_ms() >= self.expires_at
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
