//! Model metadata cache invalidation.
//!
//! Public and tenant schemas register different model sets, so the numeric
//! id cached for `(app_label, model)` on one schema is wrong on another. Every
//! schema switch clears the cache.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-wide cache that must not survive a schema switch.
pub trait MetadataCache: Send + Sync {
    /// Drop every cached entry. Idempotent.
    fn invalidate(&self);
}

/// Cache that holds nothing, for callers with no metadata cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetadataCache;

impl MetadataCache for NoopMetadataCache {
    fn invalidate(&self) {}
}

/// Content-type style cache: `(app_label, model_name)` to a schema-local id.
#[derive(Debug, Default)]
pub struct ContentTypeCache {
    entries: RwLock<HashMap<(String, String), i64>>,
    invalidations: AtomicU64,
}

impl ContentTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn get(&self, app_label: &str, model_name: &str) -> Option<i64> {
        self.entries
            .read()
            .get(&(app_label.to_string(), model_name.to_lowercase()))
            .copied()
    }

    /// Return the cached id, loading it with `load` on a miss.
    pub fn get_or_insert_with<F>(&self, app_label: &str, model_name: &str, load: F) -> i64
    where
        F: FnOnce() -> i64,
    {
        if let Some(id) = self.get(app_label, model_name) {
            return id;
        }
        let key = (app_label.to_string(), model_name.to_lowercase());
        *self.entries.write().entry(key).or_insert_with(load)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of times the cache has been cleared.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

impl MetadataCache for ContentTypeCache {
    fn invalidate(&self) {
        self.entries.write().clear();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Metadata cache cleared");
    }
}
