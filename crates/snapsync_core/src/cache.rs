//! Read-through cache for slowly changing reference data.
//!
//! Domain hooks look up things like country or tariff descriptions by
//! composite keys. The cache sits behind [`ReferenceLoader`] and is shared
//! explicitly rather than kept in global state. Misses are cached as well;
//! loader errors are not.

use crate::error::CoreResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of reference data.
pub trait ReferenceLoader<K, V>: Send + Sync {
    /// Loads the value for `key`, `None` if it does not exist.
    fn load(&self, key: &K) -> CoreResult<Option<V>>;
}

impl<K, V, F> ReferenceLoader<K, V> for F
where
    F: Fn(&K) -> CoreResult<Option<V>> + Send + Sync,
{
    fn load(&self, key: &K) -> CoreResult<Option<V>> {
        self(key)
    }
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that went to the loader.
    pub misses: u64,
}

/// Process-scoped read-through cache.
pub struct ReferenceCache<K, V> {
    loader: Box<dyn ReferenceLoader<K, V>>,
    entries: RwLock<HashMap<K, Option<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> ReferenceCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty cache over `loader`.
    pub fn new(loader: impl ReferenceLoader<K, V> + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks `key` up, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns the loader's error; nothing is cached in that case.
    pub fn get(&self, key: &K) -> CoreResult<Option<V>> {
        if let Some(cached) = self.entries.read().get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let loaded = self.loader.load(key)?;
        self.entries
            .write()
            .entry(key.clone())
            .or_insert_with(|| loaded.clone());
        Ok(loaded)
    }

    /// Drops every cached entry.
    pub fn invalidate_all(&self) {
        self.entries.write().clear();
    }

    /// Number of cached keys, including cached misses.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> std::fmt::Debug for ReferenceCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceCache")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}
