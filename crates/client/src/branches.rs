//! Branch context and the branch-switch flow.
//!
//! Process-wide state of "available branches" and "current branch". Hydration
//! serves the persisted snapshot first and refreshes through the keyed cache;
//! switching runs a strictly sequential sequence — persist selection, call
//! the backend, replace the three session snapshots together, broadcast an
//! invalidation — and rolls the selection back if the round-trip fails.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;

use medidesk_core::LocationId;

use crate::api::FrontOfficeApi;
use crate::cache::KeyedCache;
use crate::error::{FetchError, FetchResult};
use crate::invalidation::Invalidation;
use crate::session::SessionStore;
use crate::types::Branch;

/// Cache key for the branch list. Location-scoped state derives from it, so
/// a tenant change clears the whole cache rather than this key alone.
pub const BRANCHES_CACHE_KEY: &str = "user-branches";

/// How often the watcher looks for out-of-band selection changes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Lifecycle of the branch context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchPhase {
    Uninitialized,
    /// Serving the persisted snapshot while the refresh is in flight.
    Hydrating,
    /// No snapshot existed; waiting on the first fetch.
    Loading,
    Ready,
    /// A switch round-trip is in flight.
    Switching,
}

#[derive(Debug, Clone)]
struct BranchState {
    phase: BranchPhase,
    branches: Vec<Branch>,
    current: Option<Branch>,
}

/// Process-wide branch state and switch orchestration.
pub struct BranchContext {
    api: Arc<dyn FrontOfficeApi>,
    session: SessionStore,
    cache: KeyedCache<Vec<Branch>>,
    state: Mutex<BranchState>,
    /// Serializes hydrate/refresh/switch so no two mutations of the branch
    /// and permission snapshots ever interleave.
    ops: Mutex<()>,
}

impl BranchContext {
    pub fn new(api: Arc<dyn FrontOfficeApi>, session: SessionStore) -> Self {
        Self::with_cache(api, session, KeyedCache::with_defaults())
    }

    /// Construct with an injected cache (tests control TTL and deadlines).
    pub fn with_cache(
        api: Arc<dyn FrontOfficeApi>,
        session: SessionStore,
        cache: KeyedCache<Vec<Branch>>,
    ) -> Self {
        Self {
            api,
            session,
            cache,
            state: Mutex::new(BranchState {
                phase: BranchPhase::Uninitialized,
                branches: Vec::new(),
                current: None,
            }),
            ops: Mutex::new(()),
        }
    }

    pub async fn phase(&self) -> BranchPhase {
        self.state.lock().await.phase
    }

    pub async fn current(&self) -> Option<Branch> {
        self.state.lock().await.current.clone()
    }

    pub async fn branches(&self) -> Vec<Branch> {
        self.state.lock().await.branches.clone()
    }

    /// Serve the persisted branch-list snapshot immediately (if one exists),
    /// then refresh from the backend and replace state wholesale.
    pub async fn hydrate(&self) -> FetchResult<()> {
        let _ops = self.ops.lock().await;

        self.state.lock().await.phase = BranchPhase::Hydrating;

        match self.session.branch_list_snapshot().await {
            Ok(Some(snapshot)) if !snapshot.is_empty() => {
                let current = self.pick_current(&snapshot).await?;
                let mut state = self.state.lock().await;
                state.branches = snapshot;
                state.current = current;
                state.phase = BranchPhase::Ready;
                tracing::debug!(
                    branches = state.branches.len(),
                    "hydrated branch list from snapshot"
                );
            }
            Ok(_) => {}
            // A corrupt snapshot must not block startup; the refresh below
            // rewrites it.
            Err(err) => tracing::warn!(error = %err, "ignoring unreadable branch snapshot"),
        }

        self.refresh_locked().await
    }

    /// Re-fetch the branch list through the cache and replace state.
    pub async fn refresh(&self) -> FetchResult<()> {
        let _ops = self.ops.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> FetchResult<()> {
        {
            let mut state = self.state.lock().await;
            if matches!(
                state.phase,
                BranchPhase::Uninitialized | BranchPhase::Hydrating
            ) && state.branches.is_empty()
            {
                state.phase = BranchPhase::Loading;
            }
        }

        let token = self.session.token().await?;
        let api = Arc::clone(&self.api);
        let branches = self
            .cache
            .get(BRANCHES_CACHE_KEY, || {
                let token = token.clone();
                async move { api.user_branches(token.as_deref()).await }
            })
            .await?;

        self.session.store_branch_list(&branches).await?;
        let current = self.pick_current(&branches).await?;

        let mut state = self.state.lock().await;
        state.branches = branches;
        state.current = current;
        state.phase = BranchPhase::Ready;
        Ok(())
    }

    /// Resolve which branch is current for a given list.
    ///
    /// Precedence comes from the session; when nothing resolves (or the
    /// resolved id is gone from the list) the first branch is selected and
    /// persisted, so current is never empty while branches exist.
    async fn pick_current(&self, branches: &[Branch]) -> FetchResult<Option<Branch>> {
        if let Some(id) = self.session.resolve_active_location().await? {
            if let Some(branch) = branches.iter().find(|b| b.id == id) {
                return Ok(Some(branch.clone()));
            }
            tracing::warn!(%id, "selected location missing from branch list; selecting first");
        }

        match branches.first() {
            Some(first) => {
                self.session.select_location(&first.id).await?;
                Ok(Some(first.clone()))
            }
            None => Ok(None),
        }
    }

    /// Switch the current branch.
    ///
    /// Unknown ids are a logged no-op. On success the profile, side-menu and
    /// module-access snapshots are replaced together, every location-scoped
    /// cache entry is dropped and one `LocationChanged` event is broadcast.
    /// On failure both the in-memory current branch and the persisted
    /// selection are rolled back; the snapshots stay byte-identical.
    pub async fn switch_branch(&self, location_id: &LocationId) -> FetchResult<()> {
        let _ops = self.ops.lock().await;

        let (target, previous) = {
            let state = self.state.lock().await;
            let target = state
                .branches
                .iter()
                .find(|b| b.id == *location_id)
                .cloned();
            (target, state.current.clone())
        };
        let Some(target) = target else {
            tracing::warn!(%location_id, "ignoring switch to unknown branch");
            return Ok(());
        };

        let Some(profile) = self.session.profile().await? else {
            return Err(FetchError::Unauthorized);
        };
        let previous_selection = self.session.selected_location_raw().await?;

        {
            let mut state = self.state.lock().await;
            state.phase = BranchPhase::Switching;
            state.current = Some(target.clone());
        }
        self.session.select_location(location_id).await?;

        let token = self.session.token().await?;
        let outcome = match self
            .api
            .switch_location(profile.id, location_id, token.as_deref())
            .await
        {
            Ok(snapshots) => self.session.replace_switch_snapshots(&snapshots).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                self.cache.clear_all();
                self.state.lock().await.phase = BranchPhase::Ready;
                self.session
                    .invalidations()
                    .publish(Invalidation::LocationChanged {
                        location: location_id.clone(),
                    });
                tracing::info!(user = %profile.id, branch = %target.name, %location_id, "switched branch");
                Ok(())
            }
            Err(err) => {
                if let Err(restore_err) = self
                    .session
                    .restore_selection(previous_selection.as_deref())
                    .await
                {
                    tracing::error!(error = %restore_err, "failed to restore selection after aborted switch");
                }
                let mut state = self.state.lock().await;
                state.current = previous;
                state.phase = BranchPhase::Ready;
                tracing::error!(%location_id, error = %err, "branch switch failed; rolled back");
                Err(err)
            }
        }
    }

    /// React to a selection changed out-of-band (another window or process
    /// switched branches): replay the refetch-and-reset sequence.
    pub async fn reconcile_external_selection(&self) -> FetchResult<()> {
        let resolved = self.session.resolve_active_location().await?;
        let current_id = {
            let state = self.state.lock().await;
            state.current.as_ref().map(|b| b.id.clone())
        };

        match resolved {
            Some(id) if current_id.as_ref() != Some(&id) => {
                tracing::info!(%id, "branch selection changed out-of-band; reloading");
                self.cache.clear_all();
                self.refresh().await?;
                self.session
                    .invalidations()
                    .publish(Invalidation::LocationChanged { location: id });
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Start the background watcher: an interval poll plus a storage-change
    /// hint both funnel into [`Self::reconcile_external_selection`].
    pub fn watch(self: &Arc<Self>, poll_interval: Duration) -> BranchWatcher {
        let ctx = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let storage_hint = Arc::new(Notify::new());

        let task_shutdown = Arc::clone(&shutdown);
        let task_hint = Arc::clone(&storage_hint);
        let handle = tokio::spawn(async move {
            tracing::info!("branch watcher started");

            let mut tick = tokio::time::interval(poll_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_shutdown.notified() => break,
                    _ = tick.tick() => {}
                    _ = task_hint.notified() => {}
                }

                if let Err(err) = ctx.reconcile_external_selection().await {
                    tracing::warn!(error = %err, "branch watcher reconcile failed");
                }
            }

            tracing::info!("branch watcher stopped");
        });

        BranchWatcher {
            shutdown,
            storage_hint,
            handle,
        }
    }
}

/// Handle to the background selection watcher.
pub struct BranchWatcher {
    shutdown: Arc<Notify>,
    storage_hint: Arc<Notify>,
    handle: tokio::task::JoinHandle<()>,
}

impl BranchWatcher {
    /// Hint that the persisted selection may have changed (storage listener).
    pub fn notify_storage_changed(&self) {
        self.storage_hint.notify_one();
    }

    /// Request graceful shutdown of the watcher.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub async fn join(self) {
        let _ = self.handle.await;
    }
}
