//! Invalidation Module
//!
//! Removes groups of entries after an entity changes. Sweeps are glob
//! patterns over key names, so they are deliberately over-inclusive: an
//! extra miss is cheap, a stale page is not.

use std::fmt::Display;
use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::escape_glob;
use crate::cache::keys::entity_name;
use crate::cache::store::CacheStore;
use crate::error::{CacheError, Result};

// == Invalidation Service ==
#[derive(Debug, Clone)]
pub struct InvalidationService {
    store: Arc<CacheStore>,
}

impl InvalidationService {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    // == Entity ==
    /// Removes the entity's own entry, then every key of its type that
    /// embeds the id (`user:*42*`). Returns the number of keys swept.
    ///
    /// The id is matched literally: glob characters in it are escaped.
    pub async fn invalidate_entity<T: ?Sized>(&self, id: impl Display) -> Result<u64> {
        let entity = entity_name::<T>();
        let id = id.to_string();
        let key = self.store.keys().entity_key_named(&entity, &id, None)?;
        self.store.remove(&key).await?;

        let pattern = format!(
            "{}{}*{}*",
            escape_glob(&entity),
            escape_glob(self.separator()),
            escape_glob(&id)
        );
        let removed = self.sweep(&pattern).await?;
        info!(entity = %entity, id = %id, removed, "Invalidated entity");
        Ok(removed)
    }

    // == Entity Type ==
    /// Removes every key of the type.
    pub async fn invalidate_entity_type<T: ?Sized>(&self) -> Result<u64> {
        let entity = entity_name::<T>();
        let pattern = format!(
            "{}{}*",
            escape_glob(&entity),
            escape_glob(self.separator())
        );
        let removed = self.sweep(&pattern).await?;
        info!(entity = %entity, removed, "Invalidated entity type");
        Ok(removed)
    }

    // == Related ==
    /// Removes the entity's entries plus the list, search, query and count
    /// results of its type, and keys of other types that reference it.
    pub async fn invalidate_related<T: ?Sized>(&self, id: impl Display) -> Result<u64> {
        let entity = entity_name::<T>();
        let id = id.to_string();
        if id.trim().is_empty() {
            return Err(CacheError::InvalidKey(format!(
                "empty id for entity '{}'",
                entity
            )));
        }

        let mut removed = 0;
        for pattern in related_patterns(&entity, &id, self.separator()) {
            removed += self.sweep(&pattern).await?;
        }
        info!(entity = %entity, id = %id, removed, "Invalidated related entries");
        Ok(removed)
    }

    // == Pattern ==
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        self.sweep(pattern).await
    }

    // == Clear All ==
    /// Flushes the whole backing database. Administrative only.
    pub async fn clear_all(&self) -> Result<()> {
        if let Err(e) = self.store.clear_all().await {
            warn!(error = %e, "Cache flush failed");
        }
        Ok(())
    }

    fn separator(&self) -> &str {
        self.store.keys().separator()
    }

    async fn sweep(&self, pattern: &str) -> Result<u64> {
        match self.store.remove_by_pattern(pattern).await {
            Ok(removed) => Ok(removed),
            Err(CacheError::InvalidKey(reason)) => Err(CacheError::InvalidKey(reason)),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Invalidation sweep failed");
                Ok(0)
            }
        }
    }
}

/// Patterns swept by [`InvalidationService::invalidate_related`], joined
/// with `sep`. Entity and id are escaped so they only match literally.
pub fn related_patterns(entity: &str, id: &str, sep: &str) -> Vec<String> {
    let entity = escape_glob(entity);
    let id = escape_glob(id);
    let sep = escape_glob(sep);
    vec![
        format!("{entity}{sep}id{sep}{id}*"),
        format!("{entity}{sep}*{sep}{id}"),
        format!("{entity}{sep}*{sep}{id}{sep}*"),
        format!("{entity}{sep}list*"),
        format!("{entity}{sep}search*"),
        format!("{entity}{sep}query*"),
        format!("{entity}{sep}count*"),
        format!("*{sep}{entity}{sep}{id}*"),
    ]
}
