//! A bounded LRU cache that never keeps its values alive.
//!
//! Values are handed out as [`Reclaimable`] handles created by the cache. The cache itself keeps
//! [`Weak`] references only, so a value stays retrievable for as long as somebody else owns its
//! handle. When the last owner drops it, the handle pushes its key onto the cache's reclamation
//! queue, and the next [`get`](ReclaimingCache::get) or [`put`](ReclaimingCache::put) removes
//! exactly the queued entries. There is no background sweeper.
//!
//! The cache is not thread-safe. It is meant to live inside a single serialized worker. Handles
//! may be dropped on any thread.
use std::{
    fmt,
    hash::Hash,
    num::NonZeroUsize,
    ops::Deref,
    sync::{Arc, Weak},
};

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::CacheConfig;

type ReclamationQueue<K> = Arc<Mutex<Vec<K>>>;

/// A cached value that reports its own reclamation.
///
/// Created with [`ReclaimingCache::reclaimable`] and stored under the same key.
pub struct Reclaimable<K, V> {
    value: V,
    key: Option<K>,
    queue: ReclamationQueue<K>,
}

impl<K, V> Deref for Reclaimable<K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<K, V> Drop for Reclaimable<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.queue.lock().push(key);
        }
    }
}

impl<K, V: fmt::Debug> fmt::Debug for Reclaimable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reclaimable").field(&self.value).finish()
    }
}

/// Bounded, access-ordered map from `K` to reclaimable `V`.
pub struct ReclaimingCache<K, V> {
    entries: LruCache<K, Weak<Reclaimable<K, V>>>,
    reclaimed: ReclamationQueue<K>,
    max: NonZeroUsize,
    load_factor: f32,
}

impl<K: Hash + Eq + Clone, V> ReclaimingCache<K, V> {
    /// Create a cache sized according to `config`.
    ///
    /// Initial capacity is `ceil(min / load_factor)` (capped at `max`). The cache grows on demand
    /// and starts evicting once it holds `max` entries.
    pub fn new(config: &CacheConfig) -> Self {
        let max = NonZeroUsize::new(config.max).unwrap_or(NonZeroUsize::MIN);
        let initial = initial_capacity(config.min, config.load_factor, max);

        ReclaimingCache {
            entries: LruCache::new(initial),
            reclaimed: Arc::default(),
            max,
            load_factor: config.load_factor,
        }
    }

    /// Wrap `value` into a handle that reports `key` to this cache once it is dropped.
    pub fn reclaimable(&self, key: K, value: V) -> Arc<Reclaimable<K, V>> {
        Arc::new(Reclaimable {
            value,
            key: Some(key),
            queue: Arc::clone(&self.reclaimed),
        })
    }

    /// Get a live value, promoting it to most-recently-used.
    ///
    /// The reclamation queue is drained before the read.
    pub fn get(&mut self, key: &K) -> Option<Arc<Reclaimable<K, V>>> {
        self.drain_reclaimed();

        match self.entries.get(key).map(Weak::upgrade) {
            Some(Some(value)) => Some(value),
            Some(None) => {
                // Dead, but reported under another key.
                self.entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` under `key`, returning the previous value if it is still alive.
    ///
    /// Passing `None` is a no-op that returns `None`. The cache only keeps a weak reference; the
    /// caller's handle is what keeps the value alive.
    pub fn put(
        &mut self,
        key: K,
        value: impl Into<Option<Arc<Reclaimable<K, V>>>>,
    ) -> Option<Arc<Reclaimable<K, V>>> {
        let value = value.into()?;

        self.drain_reclaimed();
        if !self.entries.contains(&key) {
            self.grow_for_insert();
        }

        let previous = self.entries.push(key.clone(), Arc::downgrade(&value));
        match previous {
            // `push` returns the replaced entry under the same key, or the evicted LRU entry.
            Some((previous_key, previous)) if previous_key == key => previous.upgrade(),
            Some(_) => {
                log::trace!(target: "feature_lookup", "evicted least-recently-used cache entry");
                None
            }
            None => None,
        }
    }

    /// Remove `key`, returning its value if still alive.
    pub fn remove(&mut self, key: &K) -> Option<Arc<Reclaimable<K, V>>> {
        self.entries.pop(key).and_then(|value| value.upgrade())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.reclaimed.lock().clear();
    }

    /// Number of entries currently held, including ones reclaimed since the last drain.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys, most-recently-used first. Does not promote.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Live values, most-recently-used first.
    pub fn values(&self) -> Vec<Arc<Reclaimable<K, V>>> {
        self.entries
            .iter()
            .filter_map(|(_, value)| value.upgrade())
            .collect()
    }

    /// Live entries, most-recently-used first.
    pub fn entries(&self) -> Vec<(K, Arc<Reclaimable<K, V>>)> {
        self.entries
            .iter()
            .filter_map(|(key, value)| value.upgrade().map(|value| (key.clone(), value)))
            .collect()
    }

    /// Remove the entries whose handles were dropped since the last drain.
    fn drain_reclaimed(&mut self) {
        let reclaimed = std::mem::take(&mut *self.reclaimed.lock());
        if reclaimed.is_empty() {
            return;
        }

        let mut purged = 0;
        for key in reclaimed {
            // The key may have been stored again with a live value since.
            if self
                .entries
                .peek(&key)
                .is_some_and(|value| value.strong_count() == 0)
            {
                self.entries.pop(&key);
                purged += 1;
            }
        }

        if purged > 0 {
            log::trace!(target: "feature_lookup", purged; "purged reclaimed cache entries");
        }
    }

    /// Raise the bound ahead of an insert until the load factor threshold or `max` is reached.
    fn grow_for_insert(&mut self) {
        let cap = self.entries.cap();
        if cap >= self.max {
            return;
        }

        let threshold = (cap.get() as f32 * self.load_factor) as usize;
        if self.entries.len() + 1 > threshold {
            let grown = cap.saturating_mul(NonZeroUsize::new(2).unwrap_or(NonZeroUsize::MIN));
            self.entries.resize(grown.min(self.max));
        }
    }
}

fn initial_capacity(min: usize, load_factor: f32, max: NonZeroUsize) -> NonZeroUsize {
    let slots = (min as f32 / load_factor).ceil() as usize;
    NonZeroUsize::new(slots).map_or(NonZeroUsize::MIN, |slots| slots.min(max))
}
