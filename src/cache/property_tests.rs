//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check key derivation and store behavior over generated
//! inputs.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::InMemoryStore;
use crate::cache::{CacheStore, FieldValue, KeyService, QUERY_HASH_LEN};
use crate::config::CacheOptions;

struct Article;

// == Strategies ==
/// Key segments as they appear in entity ids and slugs
fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,32}".prop_map(|s| s)
}

/// Logical keys of one to four segments
fn key_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(segment_strategy(), 1..5).prop_map(|parts| parts.join(":"))
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,256}".prop_map(|s| s)
}

fn field_strategy() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::from),
        (-1_000_000i64..1_000_000).prop_map(FieldValue::from),
        "[a-z ]{0,16}".prop_map(FieldValue::from),
    ]
}

fn keys() -> KeyService {
    KeyService::new(&CacheOptions::default())
}

fn store() -> CacheStore {
    CacheStore::new(Arc::new(InMemoryStore::new()), CacheOptions::default())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // **Property 1: Entity Key Determinism**
    // Deriving an entity key twice from the same inputs yields the same key.
    #[test]
    fn prop_entity_key_deterministic(id in segment_strategy(), suffix in proptest::option::of(segment_strategy())) {
        let keys = keys();
        let first = keys.entity_key::<Article>(&id, suffix.as_deref()).unwrap();
        let second = keys.entity_key::<Article>(&id, suffix.as_deref()).unwrap();

        prop_assert_eq!(&first, &second);
        let expected_prefix = format!("article:id:{}", id);
        prop_assert!(first.starts_with(&expected_prefix));
    }

    // **Property 2: Query Key Canonicalization**
    // Two queries with the same fields hash to the same key whatever order the
    // fields were inserted in.
    #[test]
    fn prop_query_key_ignores_insertion_order(
        fields in prop::collection::vec((segment_strategy(), field_strategy()), 0..8)
    ) {
        let keys = keys();
        let forward: BTreeMap<String, FieldValue> = fields.iter().cloned().collect();
        let reversed: std::collections::HashMap<String, FieldValue> = forward
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let a = keys.query_key::<Article, _>("search", &forward).unwrap();
        let b = keys.query_key::<Article, _>("search", &reversed).unwrap();

        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.len(), "article:search:".len() + QUERY_HASH_LEN);
    }

    // **Property 3: Over-Length Keys Hash to Fixed Length**
    // Any key longer than the maximum normalizes to the same fixed length, and
    // distinct long keys stay distinct.
    #[test]
    fn prop_long_keys_are_fixed_length_and_distinct(
        a in "[a-z]{300,400}",
        b in "[a-z]{300,400}"
    ) {
        prop_assume!(a != b);
        let keys = keys();
        let expected = CacheOptions::default().hashed_key_length();

        let hashed_a = keys.normalize(&a).unwrap();
        let hashed_b = keys.normalize(&b).unwrap();

        prop_assert_eq!(hashed_a.len(), expected);
        prop_assert_eq!(hashed_b.len(), expected);
        prop_assert_ne!(hashed_a, hashed_b);
    }

    // **Property 4: Normalization Is Injective**
    // Every logical key is prefixed, and distinct keys never share a slot,
    // even when one of them already looks prefixed.
    #[test]
    fn prop_normalize_injective(key in key_strategy(), other in key_strategy()) {
        let keys = keys();
        let normalized = keys.normalize(&key).unwrap();
        prop_assert!(normalized.starts_with("cms:"));

        let prefixed = format!("cms:{}", key);
        prop_assert_ne!(keys.normalize(&prefixed).unwrap(), normalized.clone());
        if key != other {
            prop_assert_ne!(keys.normalize(&other).unwrap(), normalized);
        }
    }

    // **Property 5: Round-trip Storage Consistency**
    // A value written and read back before expiry is the value written.
    #[test]
    fn prop_roundtrip_storage(key in key_strategy(), value in value_strategy()) {
        let store = store();

        let retrieved: Option<String> = tokio_test::block_on(async {
            store.set(&key, &value, None).await.unwrap();
            store.get(&key).await.unwrap()
        });

        prop_assert_eq!(retrieved, Some(value));
    }

    // **Property 6: Remove Is Idempotent**
    // Removing a key once or twice leaves the same state: absent.
    #[test]
    fn prop_remove_idempotent(key in key_strategy(), value in value_strategy(), twice in any::<bool>()) {
        let store = store();

        let exists = tokio_test::block_on(async {
            store.set(&key, &value, None).await.unwrap();
            store.remove(&key).await.unwrap();
            if twice {
                store.remove(&key).await.unwrap();
            }
            store.exists(&key).await.unwrap()
        });

        prop_assert!(!exists, "Key should not exist after remove");
    }

    // **Property 7: Statistics Accuracy**
    // Every read is counted as exactly one hit or one miss.
    #[test]
    fn prop_statistics_accuracy(
        writes in prop::collection::vec(key_strategy(), 0..10),
        reads in prop::collection::vec(key_strategy(), 1..20)
    ) {
        let store = store();

        let expected_hits = tokio_test::block_on(async {
            for key in &writes {
                store.set(key, &1u8, None).await.unwrap();
            }
            let mut hits = 0u64;
            for key in &reads {
                if store.get::<u8>(key).await.unwrap().is_some() {
                    hits += 1;
                }
            }
            hits
        });

        let snapshot = store.metrics().snapshot();
        prop_assert_eq!(snapshot.hits, expected_hits);
        prop_assert_eq!(snapshot.lookups(), reads.len() as u64);
    }
}

// == Property Test for Error Response Format ==
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    // **Property 8: Error Response Format**
    // Every error rendered by the admin API is a JSON object with a string
    // "error" field carrying the message.
    #[test]
    fn prop_error_response_format(error_msg in "[a-zA-Z0-9 _-]{1,100}") {
        use crate::error::CacheError;
        use axum::body::to_bytes;
        use axum::response::IntoResponse;

        let error_variants = vec![
            CacheError::Backend(error_msg.clone()),
            CacheError::InvalidKey(error_msg.clone()),
            CacheError::Serialization(error_msg.clone()),
        ];

        for error in error_variants {
            let expected_msg = error.to_string();
            let response = error.into_response();

            let content_type = response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok());
            prop_assert!(
                content_type.map(|ct| ct.contains("application/json")).unwrap_or(false),
                "Response should have JSON content-type"
            );

            let bytes = tokio_test::block_on(to_bytes(response.into_body(), usize::MAX)).unwrap();
            let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

            prop_assert_eq!(json.get("error").and_then(|v| v.as_str()), Some(expected_msg.as_str()));
        }
    }
}
