//! Coarse, lock-free clock used for expiry checks on the hot path.
//!
//! A single background task refreshes an atomic millisecond counter every
//! ~100 ms; readers pay an atomic load instead of a syscall. Before the
//! first refresh has landed, reads fall back to the real wall clock so no
//! caller ever observes a zero timestamp.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Process-wide coarse timestamp, refreshed on a fixed cadence.
pub struct CoarseClock {
    millis: AtomicU64,
}

impl CoarseClock {
    /// Start the background refresher and return a handle to the clock.
    ///
    /// The refresher task holds only a `Weak` reference, so it exits
    /// quietly once the last `Arc<CoarseClock>` is dropped instead of
    /// leaking a task per clock instance.
    pub fn start() -> Arc<Self> {
        let clock = Arc::new(Self {
            millis: AtomicU64::new(0),
        });
        spawn_refresher(Arc::downgrade(&clock));
        clock
    }

    /// Current coarse timestamp, in milliseconds since the Unix epoch.
    pub fn now_millis(&self) -> u64 {
        let cached = self.millis.load(Ordering::Relaxed);
        if cached == 0 {
            return wall_clock_millis();
        }
        cached
    }
}

fn spawn_refresher(clock: Weak<CoarseClock>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REFRESH_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let Some(clock) = clock.upgrade() else {
                tracing::debug!(target: "readcache", "coarse clock refresher exiting, no owners left");
                return;
            };
            clock.millis.store(wall_clock_millis(), Ordering::Relaxed);
        }
    });
}

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
