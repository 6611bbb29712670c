//! Department resolution for the active branch.
//!
//! A narrow specialization of the keyed-cache pattern: the resolver keeps
//! only the most recent `(user, location)` pair. Identical concurrent calls
//! collapse to one request; a call for a different key replaces the slot and
//! always refetches. The slot is dropped whenever the active branch changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;

use medidesk_core::{LocationId, UserId};

use crate::api::FrontOfficeApi;
use crate::cache::DEFAULT_DEADLINE;
use crate::error::{FetchError, FetchResult};
use crate::invalidation::InvalidationBus;
use crate::types::Department;

type Key = (UserId, LocationId);

enum SlotState {
    InFlight {
        tx: broadcast::Sender<FetchResult<Department>>,
        epoch: u64,
    },
    Ready(Department),
}

struct Slot {
    key: Key,
    state: SlotState,
}

enum Plan {
    Hit(Department),
    Wait(broadcast::Receiver<FetchResult<Department>>),
    Fetch {
        tx: broadcast::Sender<FetchResult<Department>>,
        epoch: u64,
    },
}

/// Single-slot resolver for the user's display department.
pub struct DepartmentResolver {
    api: Arc<dyn FrontOfficeApi>,
    slot: Arc<Mutex<Option<Slot>>>,
    epochs: AtomicU64,
    deadline: Duration,
}

impl DepartmentResolver {
    pub fn new(api: Arc<dyn FrontOfficeApi>) -> Self {
        Self::with_deadline(api, DEFAULT_DEADLINE)
    }

    pub fn with_deadline(api: Arc<dyn FrontOfficeApi>, deadline: Duration) -> Self {
        Self {
            api,
            slot: Arc::new(Mutex::new(None)),
            epochs: AtomicU64::new(0),
            deadline,
        }
    }

    /// Resolve the department for `(user, location)`.
    ///
    /// Returns the memoized result when the slot already holds this key;
    /// otherwise replaces the slot and fetches fresh.
    pub async fn fetch(
        &self,
        user_id: UserId,
        location_id: &LocationId,
        token: Option<&str>,
    ) -> FetchResult<Department> {
        let key = (user_id, location_id.clone());

        let plan = {
            let mut slot = lock_slot(&self.slot);
            match slot.as_ref() {
                Some(held) if held.key == key => match &held.state {
                    SlotState::Ready(department) => Plan::Hit(department.clone()),
                    SlotState::InFlight { tx, .. } => Plan::Wait(tx.subscribe()),
                },
                _ => {
                    let epoch = self.epochs.fetch_add(1, Ordering::Relaxed);
                    let (tx, _) = broadcast::channel(1);
                    *slot = Some(Slot {
                        key: key.clone(),
                        state: SlotState::InFlight {
                            tx: tx.clone(),
                            epoch,
                        },
                    });
                    Plan::Fetch { tx, epoch }
                }
            }
        };

        match plan {
            Plan::Hit(department) => Ok(department),
            Plan::Wait(mut rx) => match rx.recv().await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Network(
                    "in-flight department fetch was abandoned".to_string(),
                )),
            },
            Plan::Fetch { tx, epoch } => {
                let mut guard = SlotGuard {
                    slot: Arc::clone(&self.slot),
                    epoch,
                    armed: true,
                };

                let result = match tokio::time::timeout(
                    self.deadline,
                    self.api.user_department(user_id, location_id, token),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout),
                };

                {
                    let mut slot = lock_slot(&self.slot);
                    // A newer key may have taken the slot while we were out.
                    let still_ours = matches!(
                        slot.as_ref(),
                        Some(Slot {
                            state: SlotState::InFlight { epoch: e, .. },
                            ..
                        }) if *e == epoch
                    );
                    if still_ours {
                        match &result {
                            Ok(department) => {
                                *slot = Some(Slot {
                                    key,
                                    state: SlotState::Ready(department.clone()),
                                });
                            }
                            Err(_) => *slot = None,
                        }
                    }
                    guard.armed = false;
                }

                let _ = tx.send(result.clone());
                result
            }
        }
    }

    /// Drop the memoized pair; the next call refetches.
    pub fn reset(&self) {
        *lock_slot(&self.slot) = None;
    }

    /// Reset automatically on every invalidation (branch change, logout).
    pub fn spawn_invalidation_listener(
        self: &Arc<Self>,
        bus: &InvalidationBus,
    ) -> tokio::task::JoinHandle<()> {
        let resolver = Arc::clone(self);
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        tracing::debug!(?event, "resetting department memo");
                        resolver.reset();
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => resolver.reset(),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn lock_slot(slot: &Arc<Mutex<Option<Slot>>>) -> MutexGuard<'_, Option<Slot>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the slot if the fetching future is dropped before settling.
struct SlotGuard {
    slot: Arc<Mutex<Option<Slot>>>,
    epoch: u64,
    armed: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut slot) = self.slot.lock() {
            let ours = matches!(
                slot.as_ref(),
                Some(Slot {
                    state: SlotState::InFlight { epoch, .. },
                    ..
                }) if *epoch == self.epoch
            );
            if ours {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockApi;
    use tokio::sync::Notify;

    fn resolver(api: &Arc<MockApi>) -> Arc<DepartmentResolver> {
        Arc::new(DepartmentResolver::new(api.clone()))
    }

    #[tokio::test]
    async fn concurrent_same_key_calls_collapse() {
        let api = Arc::new(MockApi::default());
        let gate = Arc::new(Notify::new());
        *api.department_gate.lock().unwrap() = Some(Arc::clone(&gate));
        let resolver = resolver(&api);

        let mut handles = Vec::new();
        for _ in 0..3 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(async move {
                resolver
                    .fetch(UserId::new(5), &LocationId::new("1"), Some("tok"))
                    .await
            }));
        }

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        gate.notify_waiters();

        for handle in handles {
            assert_eq!(
                handle.await.unwrap().unwrap().department_name,
                "Cardiology"
            );
        }
        assert_eq!(api.department_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn same_key_repeat_uses_the_memo() {
        let api = Arc::new(MockApi::default());
        let resolver = resolver(&api);

        resolver
            .fetch(UserId::new(5), &LocationId::new("1"), None)
            .await
            .unwrap();
        resolver
            .fetch(UserId::new(5), &LocationId::new("1"), None)
            .await
            .unwrap();

        assert_eq!(api.department_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn key_change_always_refetches() {
        let api = Arc::new(MockApi::default());
        let resolver = resolver(&api);

        let user = UserId::new(5);
        resolver.fetch(user, &LocationId::new("1"), None).await.unwrap();
        resolver.fetch(user, &LocationId::new("2"), None).await.unwrap();
        // Only the most recent pair is kept; going back refetches.
        resolver.fetch(user, &LocationId::new("1"), None).await.unwrap();

        assert_eq!(api.department_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reset_drops_the_memo() {
        let api = Arc::new(MockApi::default());
        let resolver = resolver(&api);

        resolver
            .fetch(UserId::new(5), &LocationId::new("1"), None)
            .await
            .unwrap();
        resolver.reset();
        resolver
            .fetch(UserId::new(5), &LocationId::new("1"), None)
            .await
            .unwrap();

        assert_eq!(api.department_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidation_listener_resets_on_branch_change() {
        let api = Arc::new(MockApi::default());
        let resolver = resolver(&api);
        let bus = InvalidationBus::new();
        let listener = resolver.spawn_invalidation_listener(&bus);

        resolver
            .fetch(UserId::new(5), &LocationId::new("1"), None)
            .await
            .unwrap();

        bus.publish(crate::invalidation::Invalidation::LocationChanged {
            location: LocationId::new("2"),
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        resolver
            .fetch(UserId::new(5), &LocationId::new("1"), None)
            .await
            .unwrap();
        assert_eq!(api.department_calls.load(Ordering::SeqCst), 2);

        listener.abort();
    }

    #[tokio::test]
    async fn failed_fetch_is_not_memoized() {
        let api = Arc::new(MockApi::default());
        api.fail_department.store(true, Ordering::SeqCst);
        let resolver = resolver(&api);

        let err = resolver
            .fetch(UserId::new(5), &LocationId::new("1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Api(503, _)));

        api.fail_department.store(false, Ordering::SeqCst);
        resolver
            .fetch(UserId::new(5), &LocationId::new("1"), None)
            .await
            .unwrap();
        assert_eq!(api.department_calls.load(Ordering::SeqCst), 2);
    }
}
