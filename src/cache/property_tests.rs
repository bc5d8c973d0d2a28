//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check key validation and the in-memory engine's
//! read/write, delete and counter behaviour over generated inputs.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::thread::sleep;
use std::time::Duration;

use crate::cache::validate::validate_key;
use crate::cache::{Cache, ConsistencyMode, InMemoryCache, MAX_KEY_LENGTH};
use crate::error::ErrorCode;

// == Test Configuration ==
const TEST_DEFAULT_TTL: u64 = 300;

fn strict_cache() -> InMemoryCache {
    InMemoryCache::new("prop", ConsistencyMode::Strict, TEST_DEFAULT_TTL)
}

// == Strategies ==
/// Generates valid cache keys (non-empty, no whitespace, within length limit)
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_:.-]{1,64}".prop_map(|s| s)
}

/// Generates keys that contain at least one whitespace character
fn whitespace_key_strategy() -> impl Strategy<Value = String> {
    ("[a-z]{0,10}", prop::sample::select(vec![" ", "\t", "\n", "\r", "\u{a0}"]), "[a-z]{0,10}")
        .prop_map(|(head, space, tail)| format!("{}{}{}", head, space, tail))
}

/// Generates scalar values and flat objects
fn storable_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,256}".prop_map(Value::from),
        prop::collection::hash_map("[a-z]{1,8}", any::<i32>(), 0..5)
            .prop_map(|fields| json!(fields)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Keys within 250 bytes and free of whitespace are accepted.
    #[test]
    fn prop_valid_keys_accepted(key in "[^\\s]{1,62}") {
        // Up to 62 chars of at most 4 bytes each stays within the limit
        prop_assert!(validate_key(&key));
    }

    #[test]
    fn prop_whitespace_keys_rejected(key in whitespace_key_strategy()) {
        prop_assert!(!validate_key(&key));
    }

    #[test]
    fn prop_oversized_keys_rejected(extra in 1usize..100) {
        let key = "k".repeat(MAX_KEY_LENGTH + extra);
        prop_assert!(!validate_key(&key));
    }

    // set followed by get returns the stored value.
    #[test]
    fn prop_roundtrip_storage(key in valid_key_strategy(), value in storable_value_strategy()) {
        let cache = strict_cache();
        tokio_test::block_on(async {
            cache.set(&key, value.clone(), None).await.unwrap();
            let stored = cache.get(&key).await.unwrap();
            assert_eq!(stored, Some(value));
        });
    }

    // del succeeds whether or not the key exists, and leaves it absent.
    #[test]
    fn prop_delete_idempotent(key in valid_key_strategy(), value in storable_value_strategy(), present in any::<bool>()) {
        let cache = strict_cache();
        tokio_test::block_on(async {
            if present {
                cache.set(&key, value, None).await.unwrap();
            }
            assert!(cache.del(&key).await.is_ok());
            assert!(cache.del(&key).await.is_ok());
            assert_eq!(cache.get(&key).await.unwrap(), None);
        });
    }

    // increment adds exactly the delta to an existing counter.
    #[test]
    fn prop_increment_adds_delta(start in -1_000_000i64..1_000_000, by in 1i64..10_000) {
        let cache = strict_cache();
        tokio_test::block_on(async {
            cache.set("counter", json!(start), None).await.unwrap();
            assert_eq!(cache.increment("counter", Some(by)).await.unwrap(), start + by);
            assert_eq!(cache.get("counter").await.unwrap(), Some(json!(start + by)));
        });
    }

    // Non-positive deltas are rejected before the counter is read.
    #[test]
    fn prop_non_positive_delta_rejected(by in -10_000i64..=0) {
        let cache = strict_cache();
        tokio_test::block_on(async {
            let err = cache.increment("missing", Some(by)).await.unwrap_err();
            assert_eq!(err.code(), ErrorCode::NonIntCacheValue);
        });
    }

    // Strict decrement never goes below zero.
    #[test]
    fn prop_strict_decrement_clamps(start in 0i64..10_000, by in 1i64..20_000) {
        let cache = strict_cache();
        tokio_test::block_on(async {
            cache.set("counter", json!(start), None).await.unwrap();
            let updated = cache.decrement("counter", Some(by)).await.unwrap();
            assert_eq!(updated, (start - by).max(0));
        });
    }

    // multi_get reports every requested key exactly once.
    #[test]
    fn prop_multi_get_covers_all_keys(keys in prop::collection::hash_set(valid_key_strategy(), 1..20)) {
        let cache = strict_cache();
        tokio_test::block_on(async {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            for key in refs.iter().step_by(2) {
                cache.set(key, json!(1), None).await.unwrap();
            }
            let values = cache.multi_get(&refs).await.unwrap();
            assert_eq!(values.len(), keys.len());
            for key in &keys {
                assert!(values.contains_key(key));
            }
        });
    }
}

// TTL tests sleep, so they run few cases
proptest! {
    #![proptest_config(ProptestConfig::with_cases(3))]

    #[test]
    fn prop_ttl_expiration(key in valid_key_strategy(), value in storable_value_strategy()) {
        let cache = strict_cache();
        tokio_test::block_on(async {
            cache.set(&key, value, Some(1)).await.unwrap();
            assert!(cache.get(&key).await.unwrap().is_some());
        });

        sleep(Duration::from_millis(1100));

        tokio_test::block_on(async {
            assert_eq!(cache.get(&key).await.unwrap(), None);
        });
    }
}
