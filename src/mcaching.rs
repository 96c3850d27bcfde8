//! Multi-key read-through engine: `MCaching<V, A, S, Q>`.
//!
//! Same semantics as [`Caching`](crate::caching::Caching), generalized over
//! a vector of keys: partial hits, per-element miss reporting, and
//! order-preserving result assembly.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CacheError, SentinelError};
use crate::query::MQuery;
use crate::sentinel::{SentinelGroup, DEFAULT_SENTINEL_TTL};
use crate::storage::MStorage;
use crate::ttl::TtlRange;
use crate::validate::{Resetable, Validatable};

type ValidateFn<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;
type ResetFn<V> = Arc<dyn Fn(&mut V) + Send + Sync>;

/// Read-through cache over a vector of `(key, args)` pairs at a time.
pub struct MCaching<V, A, S, Q> {
    storage: Arc<S>,
    query: Arc<Q>,
    sentinel: SentinelGroup<V>,
    ttl: TtlRange,
    sentinel_ttl: Duration,
    validate: Option<ValidateFn<V>>,
    reset: Option<ResetFn<V>>,
    _args: PhantomData<fn(&A)>,
}

impl<V, A, S, Q> MCaching<V, A, S, Q>
where
    V: Clone + Send + Sync + 'static,
    A: Send + Sync,
    S: MStorage<V>,
    Q: MQuery<A, V>,
{
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

    pub fn with_sentinel_ttl(mut self, sentinel_ttl: Duration) -> Self {
        self.sentinel_ttl = sentinel_ttl;
        self
    }

    /// Read `keys` through the cache, in order, consulting `MQuery` with
    /// `args` (aligned 1:1 with `keys`) for whatever misses. Returns the
    /// values that were produced, in the order of `keys`, and the positions
    /// in `keys` for which no value was produced.
    pub async fn mget(
        &self,
        keys: &[String],
        args: Vec<A>,
    ) -> Result<(Vec<V>, Vec<usize>), CacheError> {
        if keys.len() != args.len() {
            return Err(CacheError::contract_violation(format!(
                "mget: {} keys but {} args",
                keys.len(),
                args.len()
            )));
        }
        if keys.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let (hit_values, miss_positions) = self.storage.mget(keys).await?;
        let mut miss_set: HashSet<usize> = miss_positions.into_iter().collect();
        let hit_positions: Vec<usize> = (0..keys.len())
            .filter(|position| !miss_set.contains(position))
            .collect();

        let mut args_by_position: Vec<Option<A>> = args.into_iter().map(Some).collect();
        let mut final_hits: Vec<(usize, V)> = Vec::with_capacity(hit_positions.len());
        for (position, mut value) in hit_positions.into_iter().zip(hit_values) {
            if self.is_valid(&value) {
                final_hits.push((position, value));
            } else {
                self.run_reset(&mut value);
                miss_set.insert(position);
                tracing::debug!(target: "readcache", position, "cached value failed validation, falling through to query");
            }
        }

        if miss_set.is_empty() {
            let values = final_hits.into_iter().map(|(_, value)| value).collect();
            return Ok((values, Vec::new()));
        }

        let mut miss_positions_sorted: Vec<usize> = miss_set.into_iter().collect();
        miss_positions_sorted.sort_unstable();

        let miss_keys: Vec<String> = miss_positions_sorted
            .iter()
            .map(|&position| keys[position].clone())
            .collect();
        let mut miss_args_by_key: HashMap<String, A> =
            HashMap::with_capacity(miss_positions_sorted.len());
        for &position in &miss_positions_sorted {
            let arg = args_by_position[position]
                .take()
                .expect("args slice already validated to cover every miss position");
            miss_args_by_key.insert(keys[position].clone(), arg);
        }

        let storage = self.storage.clone();
        let query = self.query.clone();
        let ttl = self.ttl;
        let batch_results = self
            .sentinel
            .do_batch(&miss_keys, self.sentinel_ttl, move |new_keys| async move {
                execute_batch(new_keys, miss_args_by_key, query, storage, ttl).await
            })
            .await?;

        let mut miss_indexes = Vec::new();
        let mut resolved: HashMap<usize, V> = HashMap::with_capacity(batch_results.len());
        for (position, outcome) in miss_positions_sorted.iter().zip(batch_results) {
            match outcome {
                Ok(value) => {
                    resolved.insert(*position, value);
                }
                Err(SentinelError::NotFound) => miss_indexes.push(*position),
                Err(SentinelError::Failed(err)) => return Err(err),
            }
        }

        let mut output = Vec::with_capacity(final_hits.len() + resolved.len());
        let mut hits = final_hits.into_iter().peekable();
        for position in 0..keys.len() {
            match hits.peek() {
                Some((hit_position, _)) if *hit_position == position => {
                    output.push(hits.next().unwrap().1);
                }
                _ => {
                    if let Some(value) = resolved.remove(&position) {
                        output.push(value);
                    }
                }
            }
        }

        miss_indexes.sort_unstable();
        Ok((output, miss_indexes))
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

impl<V, A, S, Q> MCaching<V, A, S, Q>
where
    V: Validatable + Resetable + Clone + Send + Sync + 'static,
    A: Send + Sync,
    S: MStorage<V>,
    Q: MQuery<A, V>,
{
    pub fn with_validation(storage: S, query: Q, ttl: TtlRange) -> Self {
        let mut engine = Self::new(storage, query, ttl);
        engine.validate = Some(Arc::new(V::is_valid_cache));
        engine.reset = Some(Arc::new(V::reset));
        engine
    }
}

/// Runs as the sentinel executor for a batch of genuinely-new miss keys:
/// queries the authoritative source for exactly those keys, writes back
/// whatever it resolved, and returns one outcome per `new_keys` entry, in
/// order.
async fn execute_batch<V, A, S, Q>(
    new_keys: Vec<String>,
    mut args_by_key: HashMap<String, A>,
    query: Arc<Q>,
    storage: Arc<S>,
    ttl: TtlRange,
) -> Result<Vec<Result<V, SentinelError>>, CacheError>
where
    V: Clone + Send + Sync,
    A: Send + Sync,
    S: MStorage<V>,
    Q: MQuery<A, V>,
{
    let mut ordered_args = Vec::with_capacity(new_keys.len());
    for key in &new_keys {
        let arg = args_by_key
            .remove(key)
            .ok_or_else(|| CacheError::contract_violation("missing args for a coalesced key"))?;
        ordered_args.push(arg);
    }

    let (values, query_miss_positions) = query.query(&ordered_args).await?;
    if values.len() + query_miss_positions.len() != new_keys.len() {
        return Err(CacheError::contract_violation(
            "mquery returned an unexpected number of results",
        ));
    }
    let query_miss_set: HashSet<usize> = query_miss_positions.into_iter().collect();

    let mut values = values.into_iter();
    let mut write_keys = Vec::new();
    let mut write_values = Vec::new();
    let mut outcomes = Vec::with_capacity(new_keys.len());
    for (index, key) in new_keys.iter().enumerate() {
        if query_miss_set.contains(&index) {
            outcomes.push(Err(SentinelError::NotFound));
            continue;
        }
        let value = values.next().ok_or_else(|| {
            CacheError::contract_violation("mquery returned fewer values than expected")
        })?;
        write_keys.push(key.clone());
        write_values.push(value.clone());
        outcomes.push(Ok(value));
    }

    if !write_keys.is_empty() {
        storage.mset(&write_keys, write_values, ttl.sample()).await?;
    }

    Ok(outcomes)
}
