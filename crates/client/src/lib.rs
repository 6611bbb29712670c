//! `medidesk-client`
//!
//! **Responsibility:** session/location context and permission-resolution
//! core for the MediDesk front office.
//!
//! This crate provides:
//! - A persisted session store (token, profile, menu/permission snapshots,
//!   branch selection) with precedence-resolved location lookup
//! - A keyed de-duplicating TTL cache for master data
//! - The branch context state machine and the switch-branch flow
//! - Department resolution and role/permission editing flows
//!
//! The client is a **thin shell** around the MediDesk settings API; the
//! pure transformation logic lives in `medidesk-auth`.

pub mod api;
pub mod branches;
pub mod cache;
pub mod department;
pub mod error;
pub mod front_office;
pub mod invalidation;
pub mod roles;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use api::{FrontOfficeApi, HttpApi};
pub use branches::{BranchContext, BranchPhase, BranchWatcher, DEFAULT_POLL_INTERVAL};
pub use cache::{DEFAULT_DEADLINE, DEFAULT_TTL, KeyedCache};
pub use department::DepartmentResolver;
pub use error::{FetchError, FetchResult};
pub use front_office::{FrontOffice, FrontOfficeBackground};
pub use invalidation::{Invalidation, InvalidationBus};
pub use roles::RoleService;
pub use session::SessionStore;
pub use store::{MemoryStateStore, SqliteStateStore, StateStore};
pub use types::{Branch, Department, SwitchSnapshots, UserProfile};
