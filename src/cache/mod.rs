//! Cache Module
//!
//! The operation set every engine implements, and the three engines behind it:
//! an in-process map, a Redis-backed store and a Memcached-backed cluster.

mod codec;
mod memcached;
mod memory;
mod record;
mod redis;
mod traits;
pub mod validate;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use memcached::MemcachedCache;
pub use memory::InMemoryCache;
pub use record::Record;
pub use redis::RedisCache;
pub use traits::Cache;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 250;

/// Maximum allowed serialized value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MiB

/// Value written by `acquire_lock`
pub const LOCK_VALUE: &str = "LOCKED";

/// Delta applied by `increment`/`decrement` when none is given
pub const DEFAULT_COUNTER_DELTA: i64 = 1;

// == Consistency Mode ==
/// Whether an engine enforces the lowest-common-denominator contract
/// (`Strict`) or lets its native behaviour through (`Lenient`).
///
/// Every point where the backends disagree is answered by one method here,
/// so the engines branch on a named rule instead of on a raw flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConsistencyMode {
    #[default]
    Strict,
    Lenient,
}

impl ConsistencyMode {
    /// Maps the `consistentBehavior` configuration flag.
    pub fn from_flag(consistent: bool) -> Self {
        if consistent {
            ConsistencyMode::Strict
        } else {
            ConsistencyMode::Lenient
        }
    }

    pub fn is_strict(self) -> bool {
        self == ConsistencyMode::Strict
    }

    /// Arrays are refused because the Redis engine cannot represent them.
    pub fn rejects_arrays(self) -> bool {
        self.is_strict()
    }

    /// Counters on a missing key start from zero instead of failing.
    pub fn auto_creates_counters(self) -> bool {
        !self.is_strict()
    }

    /// Zero lifetime on `touch` means "expire now" rather than the
    /// Memcached reading of "never expire".
    pub fn zero_lifetime_expires(self) -> bool {
        self.is_strict()
    }

    /// Delta actually subtracted by `decrement`.
    ///
    /// Strict mode mirrors an unsigned counter: the delta is clamped to the
    /// current value so the result bottoms out at zero.
    pub fn decrement_delta(self, current: i64, by_value: i64) -> i64 {
        if self.is_strict() && current < by_value {
            current
        } else {
            by_value
        }
    }

    /// Flag rendering used in instance fingerprints.
    pub fn as_flag(self) -> bool {
        self.is_strict()
    }
}
