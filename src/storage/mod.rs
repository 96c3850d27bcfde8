//! Backing-store contracts the cache engines read through to.
//!
//! Any object satisfying [`Storage<V>`] and [`MStorage<V>`] can sit behind
//! [`Caching`](crate::caching::Caching) / [`MCaching`](crate::mcaching::MCaching)
//! — a remote store (Redis, a database) or, as bundled here, an in-process
//! chunked LRU. Both contracts may be satisfied by the same object.

pub mod lru;

pub use lru::LruStorage;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// Single-key backing store.
#[async_trait]
pub trait Storage<V>: Send + Sync
where
    V: Send,
{
    /// Look up `key`. `Ok(None)` means absent — not an error.
    async fn get(&self, key: &str) -> Result<Option<V>, CacheError>;

    /// Store `value` under `key` with the given time-to-live. The write
    /// MAY be silently discarded under capacity pressure; it need not be
    /// durable, only eventually visible to `get`.
    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError>;
}

/// Multi-key backing store.
#[async_trait]
pub trait MStorage<V>: Send + Sync
where
    V: Send,
{
    /// Look up every key in `keys`, in order. Returns the values found (in
    /// the order their keys were found, with a value repeated once per
    /// duplicate key) and the positions in `keys` that missed, sorted
    /// ascending.
    async fn mget(&self, keys: &[String]) -> Result<(Vec<V>, Vec<usize>), CacheError>;

    /// Store every `(key, value)` pair with the given TTL.
    /// `keys.len()` MUST equal `values.len()`.
    async fn mset(&self, keys: &[String], values: Vec<V>, ttl: Duration) -> Result<(), CacheError>;
}
