//! Process-lifetime memory tier.
//!
//! Unbounded: entries live until `clear_all` or drop. Artifacts are shared
//! with consumers through `Arc`, so clearing only drops the cache's copy.

use std::sync::Arc;

use dashmap::DashMap;

use super::key::CacheKey;

/// Notified after the memory tier has been cleared.
pub trait ClearObserver: Send + Sync {
    fn on_clear(&self);
}

/// Concurrent map of cache key to decoded artifact.
pub struct MemoryStore<A> {
    entries: DashMap<CacheKey, Arc<A>>,
    observer: Option<Arc<dyn ClearObserver>>,
}

impl<A> MemoryStore<A> {
    pub fn new() -> Self {
        Self { entries: DashMap::new(), observer: None }
    }

    /// Create a store that notifies `observer` whenever it is cleared.
    pub fn with_observer(observer: Arc<dyn ClearObserver>) -> Self {
        Self { entries: DashMap::new(), observer: Some(observer) }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<A>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert or replace the entry for `key`.
    pub fn put(&self, key: CacheKey, artifact: Arc<A>) {
        self.entries.insert(key, artifact);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry and notify the observer, if any.
    pub fn clear_all(&self) {
        self.entries.clear();
        if let Some(observer) = &self.observer {
            observer.on_clear();
        }
    }
}

impl<A> Default for MemoryStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for MemoryStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
