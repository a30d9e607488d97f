//! Key Derivation Module
//!
//! Builds deterministic cache keys from entity identity or query shape, and
//! normalizes them into the prefixed, length-bounded form the store uses.
//!
//! Key shapes (with the default `:` separator):
//! - entity: `{type}:id:{id}[:{suffix}]`
//! - collection: `{type}:{operation}[:{param}...]`
//! - query: `{type}:{operation}:{hash16}`
//! - custom: `{prefix}:{part}...`
//!
//! The store adds the configured prefix, so `entity_key::<User>(42)` is
//! `user:id:42` and lives under `cms:user:id:42` in the backing store.

use std::fmt::Display;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::CacheOptions;
use crate::error::{CacheError, Result};

/// Hex characters kept from the query digest.
pub const QUERY_HASH_LEN: usize = 16;

// == Key Service ==
#[derive(Debug, Clone)]
pub struct KeyService {
    prefix: String,
    separator: String,
    max_length: usize,
}

impl KeyService {
    pub fn new(options: &CacheOptions) -> Self {
        Self {
            prefix: options.key_prefix.clone(),
            separator: options.key_separator.clone(),
            max_length: options.max_key_length,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    // == Entity Key ==
    /// Key of a single entity, optionally narrowed by a suffix
    /// (`user:id:42:profile`).
    pub fn entity_key<T: ?Sized>(&self, id: impl Display, suffix: Option<&str>) -> Result<String> {
        self.entity_key_named(&entity_name::<T>(), id, suffix)
    }

    /// [`entity_key`](Self::entity_key) for callers that only know the entity name.
    pub fn entity_key_named(
        &self,
        entity: &str,
        id: impl Display,
        suffix: Option<&str>,
    ) -> Result<String> {
        let id = id.to_string();
        if id.trim().is_empty() {
            return Err(CacheError::InvalidKey(format!(
                "empty id for entity '{}'",
                entity
            )));
        }
        let mut parts = vec![entity.to_string(), "id".to_string(), id];
        if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
            parts.push(suffix.to_string());
        }
        self.checked(self.join(parts))
    }

    // == Collection Key ==
    /// Key of a list-shaped result (`product:by-category:7:page:2`).
    pub fn collection_key<T: ?Sized, P: Display>(
        &self,
        operation: &str,
        params: impl IntoIterator<Item = P>,
    ) -> Result<String> {
        let mut parts = vec![entity_name::<T>(), operation.to_string()];
        parts.extend(params.into_iter().map(|p| p.to_string()));
        self.checked(self.join(parts))
    }

    // == Query Key ==
    /// Key of a result computed from a structured query.
    ///
    /// The query is hashed from its canonical JSON (object keys sorted), so
    /// two queries that serialize identically share a key regardless of the
    /// order their fields were populated in.
    ///
    /// A query that fails to serialize is keyed by its address instead. That
    /// key is unique to the one value and will effectively never hit, so such
    /// queries are cached in name only.
    pub fn query_key<T: ?Sized, Q: Serialize>(&self, operation: &str, query: &Q) -> Result<String> {
        let hash = query_hash(query);
        self.checked(self.join([entity_name::<T>(), operation.to_string(), hash]))
    }

    // == Custom Key ==
    /// Free-form key: `{prefix}:{part}...`.
    pub fn custom_key<P: Display>(
        &self,
        prefix: &str,
        parts: impl IntoIterator<Item = P>,
    ) -> Result<String> {
        let mut all = vec![prefix.to_string()];
        all.extend(parts.into_iter().map(|p| p.to_string()));
        self.checked(self.join(all))
    }

    // == Normalize ==
    /// Turns a logical key into the exact key sent to the backing store:
    /// always prefixed, and replaced by `{prefix}{sep}hash:{sha256}` when it
    /// would exceed the configured maximum length.
    ///
    /// Logical keys that happen to start with the prefix are prefixed again,
    /// so `custom_key("cms", ["settings"])` and `"settings"` stay distinct.
    pub fn normalize(&self, key: &str) -> Result<String> {
        if !is_valid_key(key) {
            return Err(CacheError::InvalidKey(format!("{:?}", key)));
        }
        let namespace = self.namespace();
        let full = format!("{}{}", namespace, key);
        if full.len() <= self.max_length {
            return Ok(full);
        }
        Ok(format!("{}hash:{}", namespace, sha256_hex(full.as_bytes())))
    }

    /// Prefixes a glob pattern. Patterns are never hashed.
    pub fn normalize_pattern(&self, pattern: &str) -> Result<String> {
        if !is_valid_key(pattern) {
            return Err(CacheError::InvalidKey(format!("{:?}", pattern)));
        }
        Ok(format!("{}{}", self.namespace(), pattern))
    }

    fn namespace(&self) -> String {
        format!("{}{}", self.prefix, self.separator)
    }

    /// Joins segments with the configured separator.
    pub fn join<I, S>(&self, parts: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        parts
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(&self.separator)
    }

    fn checked(&self, key: String) -> Result<String> {
        if is_valid_key(&key) {
            Ok(key)
        } else {
            Err(CacheError::InvalidKey(format!("{:?}", key)))
        }
    }
}

// == Validation ==
/// A key is usable when it has visible content and no control characters,
/// which would corrupt the backing store's protocol encoding.
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty() && !key.chars().any(char::is_control)
}

// == Entity Name ==
/// Lower-cased simple type name: `cms::model::BlogPost<Draft>` -> `blogpost`.
///
/// Stable within a build, but renaming a type moves its key namespace.
pub fn entity_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    let simple = without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics);
    simple.to_lowercase()
}

fn query_hash<Q: Serialize>(query: &Q) -> String {
    // serde_json::Value keeps object keys in a BTreeMap, so this is canonical.
    let canonical = serde_json::to_value(query).and_then(|v| serde_json::to_string(&v));
    let digest = match canonical {
        Ok(json) => sha256_hex(json.as_bytes()),
        Err(e) => {
            tracing::warn!(
                query_type = std::any::type_name::<Q>(),
                error = %e,
                "Query serialization failed, falling back to identity hash"
            );
            let identity = format!("{}@{:p}", std::any::type_name::<Q>(), query as *const Q);
            sha256_hex(identity.as_bytes())
        }
    };
    digest[..QUERY_HASH_LEN].to_string()
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
