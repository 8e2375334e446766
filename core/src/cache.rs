// core/src/cache.rs
//
// Query cache shared by all decoder threads. Entries are tagged with the
// model generation they were computed against; an entry from another
// generation is treated as absent, so applied updates become visible without
// an explicit flush.

use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::model::Scored;
use crate::{ContextVector, HistoryKey, WordId};

/// (history, word, normalized context) triple identifying one query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub history: HistoryKey,
    pub word: WordId,
    pub context: ContextVector,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    generation: u64,
    log_prob: f32,
    history: HistoryKey,
}

/// Hit/miss counters and occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub len: usize,
    pub capacity: usize,
}

type Shard = Mutex<LruCache<CacheKey, CacheEntry, ahash::RandomState>>;

/// Sharded LRU memo of query results.
///
/// Each shard is an independent LRU behind its own mutex; the shard is picked
/// by hashing the key. A capacity of zero disables caching entirely.
pub struct QueryCache {
    shards: Vec<Shard>,
    router: ahash::RandomState,
    capacity: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl QueryCache {
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shard_count = shards.max(1).min(capacity);
        let per_shard = if shard_count == 0 {
            0
        } else {
            capacity.div_ceil(shard_count)
        };

        let shards = (0..shard_count)
            .filter_map(|_| NonZeroUsize::new(per_shard))
            .map(|cap| Mutex::new(LruCache::with_hasher(cap, ahash::RandomState::new())))
            .collect::<Vec<_>>();

        Self {
            capacity: per_shard * shards.len(),
            shards,
            router: ahash::RandomState::new(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(0, 1)
    }

    pub fn is_enabled(&self) -> bool {
        !self.shards.is_empty()
    }

    fn shard(&self, key: &CacheKey) -> Option<&Shard> {
        if self.shards.is_empty() {
            return None;
        }
        let idx = (self.router.hash_one(key) as usize) % self.shards.len();
        self.shards.get(idx)
    }

    /// Look up a result computed at `generation`.
    ///
    /// Entries from an older generation are evicted on sight; entries from a
    /// newer one are left for the readers that can use them.
    pub fn get(&self, key: &CacheKey, generation: u64) -> Option<Scored> {
        let shard = self.shard(key)?;
        let mut lru = shard.lock();

        let cached = lru
            .get(key)
            .map(|e| (e.generation, e.log_prob, e.history.clone()));
        let found = match cached {
            Some((tag, log_prob, history)) if tag == generation => Some(Scored { log_prob, history }),
            Some((tag, ..)) if tag < generation => {
                lru.pop(key);
                None
            }
            _ => None,
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Store a result computed at `generation`. Last writer wins, except that
    /// an entry from a newer generation is never replaced by an older one.
    pub fn insert(&self, key: CacheKey, generation: u64, scored: &Scored) {
        let Some(shard) = self.shard(&key) else {
            return;
        };
        let mut lru = shard.lock();
        if let Some(existing) = lru.peek(&key) {
            if existing.generation > generation {
                return;
            }
        }
        lru.put(
            key,
            CacheEntry {
                generation,
                log_prob: scored.log_prob,
                history: scored.history.clone(),
            },
        );
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.len(),
            capacity: self.capacity,
        }
    }

    /// Hit rate as a percentage, or None before the first lookup.
    pub fn hit_rate(&self) -> Option<f32> {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            None
        } else {
            Some((hits as f32 / total as f32) * 100.0)
        }
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("shards", &self.shards.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
