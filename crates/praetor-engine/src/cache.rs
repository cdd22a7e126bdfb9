//! Bounded TTL + LRU cache shared by the program cache and the decision cache.
//!
//! Entries are spread over a few independently locked shards, each an O(1)
//! LRU list. Expiry is checked lazily on access. Before an insert, expired
//! entries at the cold end of the shard are dropped; if the shard is still
//! full its least recently used entry goes. Recency is tracked per shard, so
//! with more than one shard eviction order is approximately LRU.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

/// Entries per shard before another shard is added.
const SHARD_SPAN: usize = 1024;
const MAX_SHARDS: usize = 16;

struct Slot<V> {
    value: V,
    inserted: Instant,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
    pub hit_rate: f64,
}

pub struct TtlLruCache<K, V> {
    shards: Box<[Mutex<LruCache<K, Slot<V>>>]>,
    hasher: RandomState,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> TtlLruCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        let shard_count = (capacity / SHARD_SPAN).clamp(1, MAX_SHARDS);
        let per_shard = NonZeroUsize::new(capacity.div_ceil(shard_count)).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(LruCache::new(per_shard))).collect(),
            hasher: RandomState::new(),
            capacity,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn shard<Q>(&self, key: &Q) -> &Mutex<LruCache<K, Slot<V>>>
    where
        Q: Hash + ?Sized,
    {
        let idx = (self.hasher.hash_one(key) % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    fn is_expired(&self, slot: &Slot<V>, now: Instant) -> bool {
        now.duration_since(slot.inserted) >= self.ttl
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        let mut shard = self.shard(key).lock();
        if let Some(slot) = shard.get(key) {
            if !self.is_expired(slot, now) {
                let value = slot.value.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            shard.pop(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let slot = Slot { value, inserted: now };
        let mut shard = self.shard(&key).lock();

        if shard.contains(&key) {
            shard.put(key, slot);
            return;
        }

        let mut evicted = 0;
        while shard.peek_lru().is_some_and(|(_, s)| self.is_expired(s, now)) {
            shard.pop_lru();
            evicted += 1;
        }
        if shard.len() >= shard.cap().get() && shard.pop_lru().is_some() {
            evicted += 1;
        }
        shard.put(key, slot);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.capacity,
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
        }
    }
}
