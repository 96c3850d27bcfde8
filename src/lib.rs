//! Read-through cache with request coalescing and batch-aware multi-key
//! lookups.
//!
//! [`Caching`](caching::Caching) and [`MCaching`](mcaching::MCaching) sit
//! between application code and a slower authoritative source (a remote
//! service, a database) and give three guarantees: the slow source is
//! consulted only on a cache miss or a failed validation, at most one
//! concurrent slow lookup runs per key within a process regardless of how
//! many callers ask for it at once, and a short-lived negative result
//! (the authoritative source reporting "no value for this key") is not
//! re-queried for a configurable cooling interval.
//!
//! ```
//! use std::num::NonZeroUsize;
//! use std::time::Duration;
//!
//! use readcache::{Caching, CacheError, FnQuery, LruStorage, TtlRange};
//!
//! # async fn example() -> Result<(), CacheError> {
//! let storage = LruStorage::<String>::new(
//!     NonZeroUsize::new(1024).unwrap(),
//!     NonZeroUsize::new(8).unwrap(),
//! );
//! let query = FnQuery::new(|args: &String| {
//!     let args = args.clone();
//!     async move { Ok(Some(format!("echo: {args}"))) }
//! });
//! let cache = Caching::new(storage, query, TtlRange::exact(Duration::from_secs(60)));
//!
//! let value = cache.get("hello", &"hello".to_string()).await?;
//! assert_eq!(value, Some("echo: hello".to_string()));
//! # Ok(())
//! # }
//! ```

pub mod caching;
pub mod clock;
pub mod error;
pub mod mcaching;
pub mod query;
mod sentinel;
pub mod storage;
pub mod ttl;
pub mod validate;

pub use caching::Caching;
pub use clock::CoarseClock;
pub use error::CacheError;
pub use mcaching::MCaching;
pub use query::{FnMQuery, FnQuery, MQuery, Query};
pub use storage::{LruStorage, MStorage, Storage};
pub use ttl::TtlRange;
pub use validate::{Resetable, Validatable};
