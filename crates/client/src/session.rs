//! Session state over the persisted store.
//!
//! Wraps the credentials/token and tenant-selection state and exposes the
//! precedence-resolved location lookup every scoped request goes through.

use std::sync::Arc;

use medidesk_auth::resolve_active_location;
use medidesk_core::LocationId;

use crate::error::{FetchError, FetchResult};
use crate::invalidation::{Invalidation, InvalidationBus};
use crate::store::{StateStore, keys};
use crate::types::{Branch, SwitchSnapshots, UserProfile};

/// Session facade over a [`StateStore`].
///
/// Cheap to clone; clones share the same store and invalidation bus.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn StateStore>,
    bus: InvalidationBus,
}

impl SessionStore {
    pub fn new(store: Arc<dyn StateStore>, bus: InvalidationBus) -> Self {
        Self { store, bus }
    }

    pub fn invalidations(&self) -> &InvalidationBus {
        &self.bus
    }

    /// The bearer token, if a session exists. Absence is not an error at this
    /// layer; callers decide how to react (typically by returning to login).
    pub async fn token(&self) -> FetchResult<Option<String>> {
        self.store
            .get(keys::AUTH_TOKEN)
            .await
            .map_err(FetchError::store)
    }

    /// Value for an `Authorization` header, if a token exists.
    pub async fn bearer(&self) -> FetchResult<Option<String>> {
        Ok(self.token().await?.map(|token| format!("Bearer {token}")))
    }

    /// Persist a fresh login: token plus profile, replacing any prior pair.
    pub async fn login(&self, token: &str, profile: &UserProfile) -> FetchResult<()> {
        let profile_json =
            serde_json::to_string(profile).map_err(|e| FetchError::Parse(e.to_string()))?;
        self.store
            .put_many(&[
                (keys::AUTH_TOKEN, token),
                (keys::USER_PROFILE, profile_json.as_str()),
            ])
            .await
            .map_err(FetchError::store)?;
        tracing::info!(user = %profile.id, "session established");
        Ok(())
    }

    /// The persisted user profile, if any.
    pub async fn profile(&self) -> FetchResult<Option<UserProfile>> {
        self.read_json(keys::USER_PROFILE).await
    }

    /// Raw persisted branch selection, exactly as stored.
    pub async fn selected_location_raw(&self) -> FetchResult<Option<String>> {
        self.store
            .get(keys::SELECTED_LOCATION)
            .await
            .map_err(FetchError::store)
    }

    /// Persist an explicit branch selection.
    pub async fn select_location(&self, location: &LocationId) -> FetchResult<()> {
        self.store
            .put(keys::SELECTED_LOCATION, location.as_str())
            .await
            .map_err(FetchError::store)
    }

    /// Restore the selection slot to a previously captured raw value.
    pub(crate) async fn restore_selection(&self, raw: Option<&str>) -> FetchResult<()> {
        match raw {
            Some(value) => self
                .store
                .put(keys::SELECTED_LOCATION, value)
                .await
                .map_err(FetchError::store),
            None => self
                .store
                .remove(keys::SELECTED_LOCATION)
                .await
                .map_err(FetchError::store),
        }
    }

    /// Resolve the active tenant id: explicit selection first, the profile's
    /// primary location as fallback, `None` when neither exists.
    ///
    /// This is the single precedence function; no caller re-implements it.
    pub async fn resolve_active_location(&self) -> FetchResult<Option<LocationId>> {
        let selected = self.selected_location_raw().await?;
        let primary = self
            .profile()
            .await?
            .and_then(|profile| profile.primary_location_id);
        Ok(resolve_active_location(selected.as_deref(), primary))
    }

    /// The persisted branch-list snapshot, used for instant hydration.
    pub async fn branch_list_snapshot(&self) -> FetchResult<Option<Vec<Branch>>> {
        self.read_json(keys::BRANCH_LIST).await
    }

    pub async fn store_branch_list(&self, branches: &[Branch]) -> FetchResult<()> {
        let json =
            serde_json::to_string(branches).map_err(|e| FetchError::Parse(e.to_string()))?;
        self.store
            .put(keys::BRANCH_LIST, json.as_str())
            .await
            .map_err(FetchError::store)
    }

    /// The persisted side-menu snapshot (opaque to this core).
    pub async fn side_menu(&self) -> FetchResult<Option<serde_json::Value>> {
        self.read_json(keys::SIDE_MENU).await
    }

    /// The persisted module-access snapshot (opaque to this core).
    pub async fn module_access(&self) -> FetchResult<Option<serde_json::Value>> {
        self.read_json(keys::MODULE_ACCESS).await
    }

    /// Replace the profile, side-menu and module-access snapshots together.
    ///
    /// Used only by the switch-branch flow; the three land atomically so a
    /// crash cannot leave a half-switched session.
    pub(crate) async fn replace_switch_snapshots(
        &self,
        snapshots: &SwitchSnapshots,
    ) -> FetchResult<()> {
        let profile = serde_json::to_string(&snapshots.user_profile)
            .map_err(|e| FetchError::Parse(e.to_string()))?;
        let side_menu = serde_json::to_string(&snapshots.side_menu)
            .map_err(|e| FetchError::Parse(e.to_string()))?;
        let module_access = serde_json::to_string(&snapshots.module_access)
            .map_err(|e| FetchError::Parse(e.to_string()))?;
        self.store
            .put_many(&[
                (keys::USER_PROFILE, profile.as_str()),
                (keys::SIDE_MENU, side_menu.as_str()),
                (keys::MODULE_ACCESS, module_access.as_str()),
            ])
            .await
            .map_err(FetchError::store)
    }

    /// Full session teardown: clears the token, profile, menu/permission
    /// snapshots and both location fields, then broadcasts the teardown.
    ///
    /// This is the only sanctioned way to exit an authenticated session —
    /// partial clears are how stale-permission bugs are born.
    pub async fn logout(&self) -> FetchResult<()> {
        self.store
            .clear(keys::ALL)
            .await
            .map_err(FetchError::store)?;
        self.bus.publish(Invalidation::SessionCleared);
        tracing::info!("session cleared");
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> FetchResult<Option<T>> {
        let raw = self.store.get(key).await.map_err(FetchError::store)?;
        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| FetchError::Parse(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }
}
