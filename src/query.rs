//! Pluggable slow-path lookup: the authoritative source consulted on a
//! cache miss.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::CacheError;

/// Single-key slow path. `Ok(None)` means the authoritative source has no
/// value for this key — not an error, and never retried on the engine's
/// behalf.
#[async_trait]
pub trait Query<A, V>: Send + Sync
where
    A: Send + Sync,
    V: Send,
{
    async fn query(&self, args: &A) -> Result<Option<V>, CacheError>;
}

/// Batch slow path. Returns a value for every args position that resolved,
/// in order, plus the positions (into `args`) that did not resolve.
#[async_trait]
pub trait MQuery<A, V>: Send + Sync
where
    A: Send + Sync,
    V: Send,
{
    async fn query(&self, args: &[A]) -> Result<(Vec<V>, Vec<usize>), CacheError>;
}

/// Adapts a plain async closure into a [`Query`], so tests and small
/// programs don't need to declare a dedicated struct just to implement the
/// trait.
pub struct FnQuery<F> {
    f: F,
}

impl<F> FnQuery<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<A, V, F, Fut> Query<A, V> for FnQuery<F>
where
    A: Send + Sync,
    V: Send,
    F: Fn(&A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<V>, CacheError>> + Send,
{
    async fn query(&self, args: &A) -> Result<Option<V>, CacheError> {
        (self.f)(args).await
    }
}

/// Adapts a plain async closure into an [`MQuery`].
pub struct FnMQuery<F, A> {
    f: F,
    _args: PhantomData<fn(&[A])>,
}

impl<F, A> FnMQuery<F, A> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _args: PhantomData,
        }
    }
}

#[async_trait]
impl<A, V, F, Fut> MQuery<A, V> for FnMQuery<F, A>
where
    A: Send + Sync,
    V: Send,
    F: Fn(&[A]) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(Vec<V>, Vec<usize>), CacheError>> + Send,
{
    async fn query(&self, args: &[A]) -> Result<(Vec<V>, Vec<usize>), CacheError> {
        (self.f)(args).await
    }
}
