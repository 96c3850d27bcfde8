//! End-to-end scenarios from the cache's testable-properties list, run
//! against the real `LruStorage` rather than a fake, so the whole
//! probe -> coalesce -> query -> write-back -> deferred-eviction path is
//! exercised together instead of module-by-module.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use readcache::{CacheError, Caching, FnMQuery, FnQuery, LruStorage, MCaching, TtlRange};

/// Installs a `tracing_subscriber` writer scoped to the test harness, so the
/// `debug!`/`trace!` events the engine emits on cache probes, coalesced
/// executions, and sentinel-slot lifecycle show up under `cargo test --
/// --nocapture` instead of going nowhere. Idempotent: later calls from other
/// tests in the same binary are no-ops once a subscriber is installed.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("readcache=debug")
        .try_init();
}

fn small_storage() -> LruStorage<String> {
    LruStorage::new(NonZeroUsize::new(64).unwrap(), NonZeroUsize::new(4).unwrap())
}

#[tokio::test]
async fn cold_miss_then_repeated_get_never_requeries() {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    let query = FnQuery::new(move |args: &String| {
        let calls = calls_clone.clone();
        let args = args.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(format!("echo: {args}")))
        }
    });
    let cache = Caching::new(
        small_storage(),
        query,
        TtlRange::exact(Duration::from_secs(60)),
    );

    let first = cache.get("hello", &"hello".to_string()).await.unwrap();
    assert_eq!(first, Some("echo: hello".to_string()));
    let second = cache.get("hello", &"hello".to_string()).await.unwrap();
    assert_eq!(second, Some("echo: hello".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn thousand_distinct_keys_each_queried_exactly_once() {
    init_tracing();
    let calls: Arc<Vec<AtomicU32>> = Arc::new((0..1000).map(|_| AtomicU32::new(0)).collect());
    let calls_clone = calls.clone();
    let query = FnQuery::new(move |args: &usize| {
        let calls = calls_clone.clone();
        let i = *args;
        async move {
            calls[i].fetch_add(1, Ordering::SeqCst);
            Ok(Some(format!("echo: {i}")))
        }
    });
    let cache = Arc::new(Caching::new(
        small_storage_for::<String>(),
        query,
        TtlRange::exact(Duration::from_secs(60)),
    ));

    let mut handles = Vec::with_capacity(500 * 2);
    for caller in 0..(500 * 2) {
        let cache = cache.clone();
        let key_index = caller % 1000;
        handles.push(tokio::spawn(async move {
            cache
                .get(&format!("k{key_index}"), &key_index)
                .await
                .unwrap()
        }));
    }
    for (caller, handle) in handles.into_iter().enumerate() {
        let key_index = caller % 1000;
        assert_eq!(handle.await.unwrap(), Some(format!("echo: {key_index}")));
    }
    for count in calls.iter() {
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

fn small_storage_for<V>() -> LruStorage<V> {
    LruStorage::new(
        NonZeroUsize::new(2048).unwrap(),
        NonZeroUsize::new(16).unwrap(),
    )
}

#[tokio::test]
async fn negative_coalescing_suppresses_requeries_within_the_ttl_window() {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    let query = FnQuery::new(move |_args: &String| {
        let calls = calls_clone.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(None::<String>)
        }
    });
    let cache = Caching::new(
        small_storage(),
        query,
        TtlRange::exact(Duration::from_secs(60)),
    )
    .with_sentinel_ttl(Duration::from_millis(150));
    let cache = Arc::new(cache);

    let mut burst = Vec::new();
    for _ in 0..20 {
        let cache = cache.clone();
        burst.push(tokio::spawn(async move {
            cache.get("missing", &"x".to_string()).await.unwrap()
        }));
    }
    for handle in burst {
        assert_eq!(handle.await.unwrap(), None);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Still within the sentinel TTL window: another burst must not requery.
    let mut second_burst = Vec::new();
    for _ in 0..20 {
        let cache = cache.clone();
        second_burst.push(tokio::spawn(async move {
            cache.get("missing", &"x".to_string()).await.unwrap()
        }));
    }
    for handle in second_burst {
        assert_eq!(handle.await.unwrap(), None);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // After the slot is evicted, a new call must query again.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(
        cache.get("missing", &"x".to_string()).await.unwrap(),
        None
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn lru_expiry_triggers_a_requery_after_the_ttl_elapses() {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    let query = FnQuery::new(move |_args: &String| {
        let calls = calls_clone.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some("value".to_string()))
        }
    });
    let cache = Caching::new(
        small_storage(),
        query,
        TtlRange::exact(Duration::from_millis(100)),
    );

    let first = cache.get("k", &"x".to_string()).await.unwrap();
    assert_eq!(first, Some("value".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Still within TTL: served from storage, no requery.
    let second = cache.get("k", &"x".to_string()).await.unwrap();
    assert_eq!(second, Some("value".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The sentinel slot from the first call is also evicted well before
    // this sleep ends, so this exercises LRU expiry rather than sentinel
    // negative-caching.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let third = cache.get("k", &"x".to_string()).await.unwrap();
    assert_eq!(third, Some("value".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cold_batch_mget_resolves_every_key() {
    init_tracing();
    let query = FnMQuery::new(|args: &[String]| {
        let values = args.iter().map(|a| format!("echo: {a}")).collect();
        std::future::ready(Ok::<_, CacheError>((values, Vec::new())))
    });
    let cache = MCaching::new(
        small_storage(),
        query,
        TtlRange::exact(Duration::from_secs(60)),
    );
    let keys = vec!["k1".to_string(), "k2".to_string(), "k3".to_string()];
    let args = vec!["1".to_string(), "2".to_string(), "3".to_string()];
    let (values, misses) = cache.mget(&keys, args).await.unwrap();
    assert_eq!(
        values,
        vec![
            "echo: 1".to_string(),
            "echo: 2".to_string(),
            "echo: 3".to_string()
        ]
    );
    assert!(misses.is_empty());
}

#[tokio::test]
async fn contract_violation_on_mismatched_lengths_touches_nothing() {
    init_tracing();
    let storage = small_storage();
    let query = FnMQuery::new(|args: &[String]| {
        let values = args.iter().map(|a| format!("echo: {a}")).collect();
        std::future::ready(Ok::<_, CacheError>((values, Vec::new())))
    });
    let cache = MCaching::new(storage, query, TtlRange::exact(Duration::from_secs(60)));

    let keys = vec!["k1".to_string(), "k2".to_string()];
    let args = vec!["1".to_string()];
    let err = cache.mget(&keys, args).await.unwrap_err();
    assert!(matches!(err, CacheError::ContractViolation(_)));
}
