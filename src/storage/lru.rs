//! In-process chunked LRU, the default backing store for both the
//! single-key and multi-key caching engines.
//!
//! Splitting the cache into `chunk_count` independently-locked shards
//! (rather than one big map behind one lock) keeps contention local to
//! whichever shards a given burst of keys happens to hash into, and lets
//! eviction inside one chunk proceed without blocking lookups in another.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;

use crate::clock::CoarseClock;
use crate::error::CacheError;
use crate::storage::{MStorage, Storage};

struct Entry<V> {
    value: V,
    expire_at_millis: u64,
}

/// Chunked, in-process LRU implementing both [`Storage`] and [`MStorage`].
///
/// Total capacity is approximately `chunk_capacity * chunk_count`; a key's
/// chunk is chosen by hashing, so capacity is enforced per-chunk rather
/// than globally (a hot chunk can fill and evict while a cold chunk sits
/// far under its cap).
pub struct LruStorage<V> {
    chunks: Vec<Mutex<LruCache<String, Entry<V>>>>,
    clock: Arc<CoarseClock>,
}

impl<V> LruStorage<V> {
    /// Build a new chunked LRU. `chunk_capacity` is the number of entries
    /// each chunk holds before evicting its least-recently-used entry;
    /// `chunk_count` is the number of independently-locked chunks.
    pub fn new(chunk_capacity: NonZeroUsize, chunk_count: NonZeroUsize) -> Self {
        Self::with_clock(chunk_capacity, chunk_count, CoarseClock::start())
    }

    /// Build a chunked LRU against a caller-supplied coarse clock, so
    /// several storage instances (and the sentinel groups that sit on top
    /// of them) can share one refresher task.
    pub fn with_clock(
        chunk_capacity: NonZeroUsize,
        chunk_count: NonZeroUsize,
        clock: Arc<CoarseClock>,
    ) -> Self {
        let chunks = (0..chunk_count.get())
            .map(|_| Mutex::new(LruCache::new(chunk_capacity)))
            .collect();
        Self { chunks, clock }
    }

    /// Total number of live (not necessarily unexpired) entries across all
    /// chunks.
    pub fn len(&self) -> usize {
        self.chunks
            .iter()
            .map(|chunk| chunk.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn chunk_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.chunks.len()
    }
}

impl<V: Clone> LruStorage<V> {
    fn get_one(&self, key: &str) -> Option<V> {
        let idx = self.chunk_index(key);
        let mut chunk = self.chunks[idx].lock().unwrap_or_else(|e| e.into_inner());
        let entry = chunk.get(key)?;
        if self.clock.now_millis() >= entry.expire_at_millis {
            chunk.pop(key);
            tracing::debug!(target: "readcache", key, "lru entry expired");
            return None;
        }
        Some(entry.value.clone())
    }

    fn set_one(&self, key: &str, value: V, ttl: Duration) {
        let idx = self.chunk_index(key);
        let expire_at_millis = self.clock.now_millis() + ttl.as_millis() as u64;
        let mut chunk = self.chunks[idx].lock().unwrap_or_else(|e| e.into_inner());
        chunk.put(
            key.to_string(),
            Entry {
                value,
                expire_at_millis,
            },
        );
    }
}

#[async_trait]
impl<V: Clone + Send + Sync> Storage<V> for LruStorage<V> {
    async fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        Ok(self.get_one(key))
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError> {
        self.set_one(key, value, ttl);
        Ok(())
    }
}

#[async_trait]
impl<V: Clone + Send + Sync> MStorage<V> for LruStorage<V> {
    async fn mget(&self, keys: &[String]) -> Result<(Vec<V>, Vec<usize>), CacheError> {
        let mut values = Vec::with_capacity(keys.len());
        let mut miss_indexes = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            match self.get_one(key) {
                Some(value) => values.push(value),
                None => miss_indexes.push(index),
            }
        }
        Ok((values, miss_indexes))
    }

    async fn mset(&self, keys: &[String], values: Vec<V>, ttl: Duration) -> Result<(), CacheError> {
        if keys.len() != values.len() {
            return Err(CacheError::contract_violation(format!(
                "mset: {} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        for (key, value) in keys.iter().zip(values) {
            self.set_one(key, value, ttl);
        }
        Ok(())
    }
}
