//! Per-key request coalescing.
//!
//! When enabled, concurrent resolves of the same key run one at a time: the
//! first holder fills the memory tier and later holders find it there.
//! Resolves of different keys never wait on each other.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::key::CacheKey;

/// Tracks one async lock per in-flight key.
#[derive(Debug, Default)]
pub struct KeyLocks {
    in_flight: DashMap<CacheKey, Arc<Mutex<()>>>,
}

/// Held for the duration of a coalesced resolve.
///
/// Dropping the last guard for a key removes its lock from the table.
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other resolve holds `key`, then hold it.
    pub async fn acquire(&self, key: &CacheKey) -> KeyGuard<'_> {
        let lock = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                tracing::trace!(key = %key, "waiting on in-flight resolve");
                Arc::clone(entry.get())
            }
            Entry::Vacant(entry) => Arc::clone(&entry.insert(Arc::new(Mutex::new(())))),
        };

        let guard = lock.lock_owned().await;
        KeyGuard { locks: self, key: key.clone(), guard: Some(guard) }
    }

    /// Number of keys with a resolve in flight or waiting.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table and no waiter still reference the lock.
        self.locks
            .in_flight
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
