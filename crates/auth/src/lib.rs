//! `medidesk-auth` — pure session/permission boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: location
//! precedence, permission records and the permission-matrix transformations
//! are all deterministic, synchronous logic the I/O shell builds on.

pub mod location;
pub mod matrix;
pub mod permissions;
pub mod roles;

pub use location::resolve_active_location;
pub use matrix::{ModuleNode, NodeKey, PermissionMatrix, SubModuleNode, annotate};
pub use permissions::{CrudFlag, Permission, PermissionFlags, is_dashboard};
pub use roles::{Role, RoleDraft};
