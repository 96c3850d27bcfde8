//! Single-key read-through engine: `Caching<V, A, S, Q>`.
//!
//! Orchestrates a `Storage<V>` probe, an optional validation pass, a
//! sentinel-coalesced `Query<A, V>` invocation on miss, and write-back.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CacheError, SentinelError};
use crate::query::Query;
use crate::sentinel::{SentinelGroup, DEFAULT_SENTINEL_TTL};
use crate::storage::Storage;
use crate::ttl::TtlRange;
use crate::validate::{Resetable, Validatable};

type ValidateFn<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;
type ResetFn<V> = Arc<dyn Fn(&mut V) + Send + Sync>;

/// Read-through cache for a single `(key, args)` pair at a time.
///
/// `V` is the cached value type, `A` is the argument passed through to
/// `Query` unchanged, `S` is the backing [`Storage`], `Q` is the slow-path
/// [`Query`].
pub struct Caching<V, A, S, Q> {
    storage: Arc<S>,
    query: Arc<Q>,
    sentinel: SentinelGroup<V>,
    ttl: TtlRange,
    sentinel_ttl: Duration,
    validate: Option<ValidateFn<V>>,
    reset: Option<ResetFn<V>>,
    _args: PhantomData<fn(&A)>,
}

impl<V, A, S, Q> Caching<V, A, S, Q>
where
    V: Clone + Send + Sync + 'static,
    A: Send + Sync,
    S: Storage<V>,
    Q: Query<A, V>,
{
    /// Build an engine with no value validation.
    pub fn new(storage: S, query: Q, ttl: TtlRange) -> Self {
        Self {
            storage: Arc::new(storage),
            query: Arc::new(query),
            sentinel: SentinelGroup::new(),
            ttl,
            sentinel_ttl: DEFAULT_SENTINEL_TTL,
            validate: None,
            reset: None,
            _args: PhantomData,
        }
    }

    /// Override the default sentinel slot lifetime.
    pub fn with_sentinel_ttl(mut self, sentinel_ttl: Duration) -> Self {
        self.sentinel_ttl = sentinel_ttl;
        self
    }

    /// Read `key` through the cache, consulting `Query` with `args` on miss.
    /// `Ok(None)` means the authoritative source has no value for this key;
    /// it is not an error.
    pub async fn get(&self, key: &str, args: &A) -> Result<Option<V>, CacheError> {
        if let Some(mut value) = self.storage.get(key).await? {
            if self.is_valid(&value) {
                return Ok(Some(value));
            }
            self.run_reset(&mut value);
            tracing::debug!(target: "readcache", key, "cached value failed validation, falling through to query");
        }

        let outcome = self
            .sentinel
            .do_single(key, self.sentinel_ttl, || self.execute(key, args))
            .await;

        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(SentinelError::NotFound) => Ok(None),
            Err(SentinelError::Failed(err)) => Err(err),
        }
    }

    async fn execute(&self, key: &str, args: &A) -> Result<V, SentinelError> {
        match self.query.query(args).await {
            Ok(Some(value)) => {
                let ttl = self.ttl.sample();
                self.storage
                    .set(key, value.clone(), ttl)
                    .await
                    .map_err(SentinelError::Failed)?;
                Ok(value)
            }
            Ok(None) => Err(SentinelError::NotFound),
            Err(err) => Err(SentinelError::Failed(err)),
        }
    }

    fn is_valid(&self, value: &V) -> bool {
        match &self.validate {
            Some(validate) => validate(value),
            None => true,
        }
    }

    fn run_reset(&self, value: &mut V) {
        if let Some(reset) = &self.reset {
            reset(value);
        }
    }
}

impl<V, A, S, Q> Caching<V, A, S, Q>
where
    V: Validatable + Resetable + Clone + Send + Sync + 'static,
    A: Send + Sync,
    S: Storage<V>,
    Q: Query<A, V>,
{
    /// Build an engine that discards retrieved values failing
    /// [`Validatable::is_valid_cache`], resetting them via [`Resetable::reset`]
    /// first.
    pub fn with_validation(storage: S, query: Q, ttl: TtlRange) -> Self {
        let mut engine = Self::new(storage, query, ttl);
        engine.validate = Some(Arc::new(V::is_valid_cache));
        engine.reset = Some(Arc::new(V::reset));
        engine
    }
}
