//! Keyed de-duplicating cache with TTL and per-fetch deadlines.
//!
//! Many widgets mount at once and ask for the same master data (branch list,
//! departments). The cache guarantees at most one in-flight fetch per key:
//! concurrent callers for the same key share the pending result — success and
//! failure both reach every waiter, and the fetcher runs exactly once.
//!
//! The cache is an explicitly constructed, injected object (no global
//! singleton), and it keeps time with the tokio clock, so tests pin TTL
//! expiry with `start_paused` instead of wall-clock sleeps. Every fetch runs
//! under a deadline; a hung request can never wedge later callers of its key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::{FetchError, FetchResult};

/// Master data stays warm long enough for tab-hopping, short enough that
/// administrative edits made elsewhere surface quickly.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Deadline applied to each fetch.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

enum Entry<V> {
    Ready { value: V, cached_at: Instant },
    InFlight {
        tx: broadcast::Sender<FetchResult<V>>,
        epoch: u64,
    },
}

enum Plan<V> {
    Hit(V),
    Wait(broadcast::Receiver<FetchResult<V>>),
    Fetch {
        tx: broadcast::Sender<FetchResult<V>>,
        epoch: u64,
    },
}

/// De-duplicating TTL cache keyed by string.
pub struct KeyedCache<V> {
    entries: Arc<Mutex<HashMap<String, Entry<V>>>>,
    epochs: Arc<AtomicU64>,
    ttl: Duration,
    deadline: Duration,
}

impl<V> Clone for KeyedCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            epochs: Arc::clone(&self.epochs),
            ttl: self.ttl,
            deadline: self.deadline,
        }
    }
}

impl<V: Clone> KeyedCache<V> {
    pub fn new(ttl: Duration, deadline: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            epochs: Arc::new(AtomicU64::new(0)),
            ttl,
            deadline,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_DEADLINE)
    }

    /// Return the cached value for `key` if fresh; otherwise join the
    /// in-flight fetch for it, or run `fetcher` under the deadline.
    ///
    /// On success the value is cached with the current instant; on failure
    /// (including a deadline hit) nothing is cached and the error reaches
    /// every caller that was waiting on this fetch.
    pub async fn get<F, Fut>(&self, key: &str, fetcher: F) -> FetchResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<V>>,
    {
        let plan = {
            let mut entries = self.lock_entries();
            match entries.get(key) {
                Some(Entry::Ready { value, cached_at }) if cached_at.elapsed() < self.ttl => {
                    Plan::Hit(value.clone())
                }
                Some(Entry::InFlight { tx, .. }) => Plan::Wait(tx.subscribe()),
                _ => {
                    let epoch = self.epochs.fetch_add(1, Ordering::Relaxed);
                    let (tx, _) = broadcast::channel(1);
                    entries.insert(
                        key.to_string(),
                        Entry::InFlight {
                            tx: tx.clone(),
                            epoch,
                        },
                    );
                    Plan::Fetch { tx, epoch }
                }
            }
        };

        match plan {
            Plan::Hit(value) => Ok(value),
            Plan::Wait(mut rx) => match rx.recv().await {
                Ok(result) => result,
                // The fetching caller was dropped before completing.
                Err(_) => Err(FetchError::Network(
                    "in-flight fetch was abandoned".to_string(),
                )),
            },
            Plan::Fetch { tx, epoch } => {
                let mut guard = InFlightGuard {
                    entries: Arc::clone(&self.entries),
                    key: key.to_string(),
                    epoch,
                    armed: true,
                };

                let result = match tokio::time::timeout(self.deadline, fetcher()).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(key, deadline = ?self.deadline, "fetch deadline exceeded");
                        Err(FetchError::Timeout)
                    }
                };

                {
                    let mut entries = self.lock_entries();
                    // Only settle the slot if it is still ours; an explicit
                    // clear (tenant switch) mid-flight wins over a late value.
                    if matches!(entries.get(key), Some(Entry::InFlight { epoch: e, .. }) if *e == epoch)
                    {
                        match &result {
                            Ok(value) => {
                                entries.insert(
                                    key.to_string(),
                                    Entry::Ready {
                                        value: value.clone(),
                                        cached_at: Instant::now(),
                                    },
                                );
                            }
                            Err(_) => {
                                entries.remove(key);
                            }
                        }
                    }
                    guard.armed = false;
                }

                let _ = tx.send(result.clone());
                result
            }
        }
    }

    /// Evict one key. Waiters on an in-flight fetch for it still receive that
    /// fetch's result; the cache just refuses to retain it.
    pub fn clear(&self, key: &str) {
        self.lock_entries().remove(key);
    }

    /// Evict everything. Used whenever the active tenant changes, since
    /// cached values are location-scoped by virtue of their key.
    pub fn clear_all(&self) {
        self.lock_entries().clear();
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<V>>> {
        // Entries are only touched in short non-panicking sections.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Removes the in-flight slot if the fetching future is dropped before it
/// settles, so an abandoned fetch cannot block the key forever.
struct InFlightGuard<V> {
    entries: Arc<Mutex<HashMap<String, Entry<V>>>>,
    key: String,
    epoch: u64,
    armed: bool,
}

impl<V> Drop for InFlightGuard<V> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            if matches!(entries.get(&self.key), Some(Entry::InFlight { epoch, .. }) if *epoch == self.epoch)
            {
                entries.remove(&self.key);
            }
        }
    }
}
