//! Bounded cache of clean node blobs read from the byte store.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;

/// LRU cache of blobs known to match the byte store.
///
/// A capacity of zero disables caching; every lookup then misses.
pub(crate) struct CleanCache<K: Hash + Eq> {
    inner: Option<Mutex<LruCache<K, Vec<u8>, FxBuildHasher>>>,
}

impl<K: Hash + Eq> CleanCache<K> {
    /// Creates a cache holding at most `capacity` entries.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity)
                .map(|cap| Mutex::new(LruCache::with_hasher(cap, FxBuildHasher))),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<Vec<u8>> {
        self.inner.as_ref()?.lock().get(key).cloned()
    }

    pub(crate) fn insert(&self, key: K, blob: Vec<u8>) {
        if let Some(inner) = &self.inner {
            inner.lock().put(key, blob);
        }
    }

    pub(crate) fn remove(&self, key: &K) {
        if let Some(inner) = &self.inner {
            inner.lock().pop(key);
        }
    }

    pub(crate) fn clear(&self) {
        if let Some(inner) = &self.inner {
            inner.lock().clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.lock().len())
    }
}
