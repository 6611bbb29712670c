//! Shared application state for front-office hosts.
//!
//! Data flow: [`SessionStore`] resolves the active tenant id, the
//! [`BranchContext`] fetches and caches the branch list, and the department
//! and role services derive their views from the same session. A branch
//! switch invalidates everything location-scoped through the shared bus.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{FrontOfficeApi, HttpApi};
use crate::branches::{BranchContext, BranchWatcher};
use crate::department::DepartmentResolver;
use crate::invalidation::InvalidationBus;
use crate::roles::RoleService;
use crate::session::SessionStore;
use crate::store::{SqliteStateStore, StateStore};

/// Application state shared across front-office surfaces.
pub struct FrontOffice {
    pub session: SessionStore,
    pub branches: Arc<BranchContext>,
    pub departments: Arc<DepartmentResolver>,
    pub roles: RoleService,
}

impl FrontOffice {
    /// Assemble the front office over an API implementation and state store.
    pub fn new(api: Arc<dyn FrontOfficeApi>, store: Arc<dyn StateStore>) -> Self {
        let bus = InvalidationBus::new();
        let session = SessionStore::new(store, bus);
        let branches = Arc::new(BranchContext::new(Arc::clone(&api), session.clone()));
        let departments = Arc::new(DepartmentResolver::new(Arc::clone(&api)));
        let roles = RoleService::new(api, session.clone());

        Self {
            session,
            branches,
            departments,
            roles,
        }
    }

    /// Production wiring: HTTP API plus the SQLite state store at its
    /// default path.
    pub fn connect(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let api: Arc<dyn FrontOfficeApi> = Arc::new(HttpApi::new(base_url)?);
        let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::new()?);
        Ok(Self::new(api, store))
    }

    /// Start the background machinery: the branch watcher and the listener
    /// that drops the department memo on every invalidation.
    pub fn start_background(&self, poll_interval: Duration) -> FrontOfficeBackground {
        let listener = self
            .departments
            .spawn_invalidation_listener(self.session.invalidations());
        let watcher = self.branches.watch(poll_interval);
        FrontOfficeBackground { watcher, listener }
    }
}

/// Handles to the background tasks; shut down on host exit.
pub struct FrontOfficeBackground {
    pub watcher: BranchWatcher,
    listener: tokio::task::JoinHandle<()>,
}

impl FrontOfficeBackground {
    pub fn shutdown(&self) {
        self.watcher.shutdown();
        self.listener.abort();
    }
}
