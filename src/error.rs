//! Error types for the cache engine.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Top-level error returned by `Caching`/`MCaching` operations.
///
/// `Clone` so a single Storage/Query failure observed by the sentinel
/// executor can be cheaply replayed to every coalesced waiter without
/// re-running the failing operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    /// A `Storage`/`MStorage` operation failed. Storage implementations are
    /// expected to absorb their own ignorable errors internally; whatever
    /// reaches here is surfaced to the caller as-is.
    #[error("storage error: {0}")]
    Storage(SharedError),

    /// A `Query`/`MQuery` operation failed. Not retried by the engine.
    #[error("query error: {0}")]
    Query(SharedError),

    /// A precondition on the shapes of `keys`/`args`/query results was
    /// violated (mismatched lengths, fewer results than expected, etc.).
    /// No partial results are returned when this occurs.
    #[error("contract violation: {0}")]
    ContractViolation(String),
}

impl CacheError {
    /// Wrap an arbitrary storage-layer error.
    pub fn storage<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Storage(SharedError::new(err))
    }

    /// Wrap an arbitrary query-layer error.
    pub fn query<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Query(SharedError::new(err))
    }

    /// Build a contract-violation error from a message.
    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }
}

/// Cheaply-cloneable wrapper around a boxed error, so `CacheError` can
/// derive `Clone` without requiring the underlying error type to be `Clone`.
#[derive(Debug, Clone)]
pub struct SharedError(Arc<dyn StdError + Send + Sync + 'static>);

impl SharedError {
    pub fn new<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// The boxed error isn't `PartialEq`; compare by message instead. Used only
// to let `CacheError`/`SentinelError` support `assert_eq!` in tests.
impl PartialEq for SharedError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

/// Internal outcome carried inside a sentinel slot. Distinguishes "the
/// authoritative source has no value for this key" (not an error) from a
/// real failure, so the engine can translate the former into an absent
/// result rather than an `Err`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SentinelError {
    NotFound,
    Failed(CacheError),
}

impl SentinelError {
    pub(crate) fn from_cache_error(err: CacheError) -> Self {
        Self::Failed(err)
    }
}
