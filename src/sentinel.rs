//! In-process request coalescing: at most one slow-path execution per key,
//! with a deferred-eviction tail that doubles as short-lived negative
//! caching.
//!
//! A slot's completion is published through a `tokio::sync::watch`
//! channel rather than a condition variable. That sidesteps the classic
//! coalescer race: a waiter that subscribes *after* the executor has
//! already published still observes the result immediately via
//! `borrow()`, instead of needing to have been registered before the
//! wakeup fired.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::error::{CacheError, SentinelError};

/// Default sentinel slot lifetime; ~1s balances coalescing against staleness.
pub const DEFAULT_SENTINEL_TTL: Duration = Duration::from_secs(1);

pub(crate) type SlotOutcome<V> = Result<V, SentinelError>;

enum SlotState<V> {
    Pending,
    Done(Arc<SlotOutcome<V>>),
}

struct Slot<V> {
    tx: watch::Sender<SlotState<V>>,
}

struct NewEntry<V> {
    position: usize,
    slot: Arc<Slot<V>>,
}

/// Maps coalescing keys to in-flight (or recently-completed) computations.
pub(crate) struct SentinelGroup<V> {
    slots: Arc<Mutex<HashMap<String, Arc<Slot<V>>>>>,
    deferred: DeferredQueue,
}

impl<V> SentinelGroup<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let slots = Arc::new(Mutex::new(HashMap::new()));
        let deferred = DeferredQueue::spawn(slots.clone());
        Self { slots, deferred }
    }

    /// Coalesce a single-key execution. If `key` has no in-flight or
    /// recently-completed slot, this caller becomes the executor and runs
    /// `exec`; otherwise it waits for whoever is already executing.
    pub(crate) async fn do_single<F, Fut>(
        &self,
        key: &str,
        sentinel_ttl: Duration,
        exec: F,
    ) -> SlotOutcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SlotOutcome<V>>,
    {
        let (slot, is_executor) = self.get_or_insert(key, sentinel_ttl);
        if is_executor {
            let outcome = exec().await;
            let _ = slot.tx.send(SlotState::Done(Arc::new(outcome.clone())));
            outcome
        } else {
            Self::await_done(&slot).await
        }
    }

    /// Coalesce a batch execution. Slot identity is per key: `keys` already
    /// covered by an in-flight slot attach as waiters, the rest are handed
    /// to `exec` (in the order they appear in `keys`, de-duplicated against
    /// whatever's already in flight) and become the executor for their own
    /// slot. Returns one outcome per entry in `keys`, in order.
    pub(crate) async fn do_batch<F, Fut>(
        &self,
        keys: &[String],
        sentinel_ttl: Duration,
        exec: F,
    ) -> Result<Vec<SlotOutcome<V>>, CacheError>
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Vec<SlotOutcome<V>>, CacheError>>,
    {
        let mut existing: Vec<(usize, Arc<Slot<V>>)> = Vec::new();
        let mut new_entries: Vec<NewEntry<V>> = Vec::new();
        let mut new_keys: Vec<String> = Vec::new();

        {
            let mut map = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            for (position, key) in keys.iter().enumerate() {
                if let Some(slot) = map.get(key) {
                    existing.push((position, slot.clone()));
                    continue;
                }
                let (tx, _rx) = watch::channel(SlotState::Pending);
                let slot = Arc::new(Slot { tx });
                map.insert(key.clone(), slot.clone());
                new_keys.push(key.clone());
                new_entries.push(NewEntry { position, slot });
            }
        }
        for key in &new_keys {
            self.deferred.schedule(key.clone(), sentinel_ttl);
        }

        let mut results: Vec<Option<SlotOutcome<V>>> = (0..keys.len()).map(|_| None).collect();

        if !new_entries.is_empty() {
            let outcome = exec(new_keys).await;
            match outcome {
                Ok(outcomes) if outcomes.len() == new_entries.len() => {
                    for (entry, outcome) in new_entries.iter().zip(outcomes) {
                        let _ = entry.slot.tx.send(SlotState::Done(Arc::new(outcome.clone())));
                        results[entry.position] = Some(outcome);
                    }
                }
                Ok(outcomes) => {
                    let err = CacheError::contract_violation(format!(
                        "executor returned {} outcomes for {} new keys",
                        outcomes.len(),
                        new_entries.len()
                    ));
                    Self::fail_all(&new_entries, &mut results, err.clone());
                    return Err(err);
                }
                Err(err) => {
                    Self::fail_all(&new_entries, &mut results, err.clone());
                    return Err(err);
                }
            }
        }

        for (position, slot) in existing {
            results[position] = Some(Self::await_done(&slot).await);
        }

        Ok(results
            .into_iter()
            .map(|r| r.expect("do_batch: every position filled before return"))
            .collect())
    }

    fn fail_all(
        entries: &[NewEntry<V>],
        results: &mut [Option<SlotOutcome<V>>],
        err: CacheError,
    ) {
        for entry in entries {
            let outcome: SlotOutcome<V> = Err(SentinelError::from_cache_error(err.clone()));
            let _ = entry.slot.tx.send(SlotState::Done(Arc::new(outcome.clone())));
            results[entry.position] = Some(outcome);
        }
    }

    fn get_or_insert(&self, key: &str, sentinel_ttl: Duration) -> (Arc<Slot<V>>, bool) {
        let mut map = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = map.get(key) {
            return (slot.clone(), false);
        }
        let (tx, _rx) = watch::channel(SlotState::Pending);
        let slot = Arc::new(Slot { tx });
        map.insert(key.to_string(), slot.clone());
        drop(map);
        self.deferred.schedule(key.to_string(), sentinel_ttl);
        (slot, true)
    }

    async fn await_done(slot: &Slot<V>) -> SlotOutcome<V> {
        let mut rx = slot.tx.subscribe();
        loop {
            if let SlotState::Done(outcome) = &*rx.borrow() {
                return (**outcome).clone();
            }
            if rx.changed().await.is_err() {
                return Err(SentinelError::Failed(CacheError::contract_violation(
                    "sentinel executor dropped before publishing a result",
                )));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

/// A single background task draining scheduled sentinel-slot removals, so
/// the group doesn't spawn a task per deferred removal under load.
struct DeferredQueue {
    tx: mpsc::UnboundedSender<(tokio::time::Instant, String)>,
}

impl DeferredQueue {
    fn spawn<V>(slots: Arc<Mutex<HashMap<String, Arc<Slot<V>>>>>) -> Self
    where
        V: Send + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<(tokio::time::Instant, String)>();
        tokio::spawn(async move {
            let mut heap: BinaryHeap<Reverse<(tokio::time::Instant, String)>> = BinaryHeap::new();
            loop {
                let next_deadline = heap.peek().map(|Reverse((deadline, _))| *deadline);
                tokio::select! {
                    received = rx.recv() => {
                        match received {
                            Some(item) => heap.push(Reverse(item)),
                            None => return,
                        }
                    }
                    _ = sleep_until_or_pending(next_deadline) => {
                        if let Some(Reverse((_, key))) = heap.pop() {
                            slots.lock().unwrap_or_else(|e| e.into_inner()).remove(&key);
                            tracing::debug!(target: "readcache", key = %key, "sentinel slot removed after ttl");
                        }
                    }
                }
            }
        });
        Self { tx }
    }

    fn schedule(&self, key: String, delay: Duration) {
        let deadline = tokio::time::Instant::now() + delay;
        let _ = self.tx.send((deadline, key));
    }
}

async fn sleep_until_or_pending(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
