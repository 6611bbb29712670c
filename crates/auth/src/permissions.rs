//! Permission records.
//!
//! A permission record grants CRUD flags to a role on exactly one node of the
//! module tree: either a submodule, or a module that has no submodules
//! (`sub_module_id = None`). The settings backend serializes each flag as a
//! 0/1 integer, so the flag fields carry a custom serde representation.

use serde::{Deserialize, Serialize};

use medidesk_core::{ModuleId, RoleId, SubModuleId};

/// Serialize a `bool` as 0/1 and accept any integer on the way in.
mod int_bool {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(raw != 0)
    }
}

/// One of the four CRUD flags on a permission record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrudFlag {
    View,
    Add,
    Edit,
    Delete,
}

impl CrudFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrudFlag::View => "view",
            CrudFlag::Add => "add",
            CrudFlag::Edit => "edit",
            CrudFlag::Delete => "delete",
        }
    }
}

/// CRUD flags for one node. Wire shape is `{view: 0|1, add: 0|1, ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionFlags {
    #[serde(with = "int_bool")]
    pub view: bool,
    #[serde(with = "int_bool")]
    pub add: bool,
    #[serde(with = "int_bool")]
    pub edit: bool,
    #[serde(with = "int_bool")]
    pub delete: bool,
}

impl PermissionFlags {
    /// Everything granted.
    pub fn all() -> Self {
        Self {
            view: true,
            add: true,
            edit: true,
            delete: true,
        }
    }

    /// Nothing granted.
    pub fn none() -> Self {
        Self::default()
    }

    /// View only (the maximum a dashboard-class node may carry).
    pub fn view_only() -> Self {
        Self {
            view: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.view || self.add || self.edit || self.delete)
    }

    pub fn get(&self, flag: CrudFlag) -> bool {
        match flag {
            CrudFlag::View => self.view,
            CrudFlag::Add => self.add,
            CrudFlag::Edit => self.edit,
            CrudFlag::Delete => self.delete,
        }
    }

    pub fn set(&mut self, flag: CrudFlag, value: bool) {
        match flag {
            CrudFlag::View => self.view = value,
            CrudFlag::Add => self.add = value,
            CrudFlag::Edit => self.edit = value,
            CrudFlag::Delete => self.delete = value,
        }
    }
}

/// A permission grant for one role on one node of the module tree.
///
/// # Invariants
/// - Exactly one record exists per `(role_id, module_id, sub_module_id)`.
/// - `sub_module_id = None` denotes a module-level grant, legitimate only for
///   modules without submodules.
/// - Absence of a record means "no access"; there is no explicit-deny state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub role_id: RoleId,
    pub module_id: ModuleId,
    pub sub_module_id: Option<SubModuleId>,
    #[serde(flatten)]
    pub flags: PermissionFlags,
}

impl Permission {
    /// A zero-valued record for the given node key.
    pub fn zeroed(role_id: RoleId, module_id: ModuleId, sub_module_id: Option<SubModuleId>) -> Self {
        Self {
            role_id,
            module_id,
            sub_module_id,
            flags: PermissionFlags::none(),
        }
    }

    /// Node identity within a role's record list.
    pub fn node(&self) -> (ModuleId, Option<SubModuleId>) {
        (self.module_id, self.sub_module_id)
    }
}

/// Whether a node is dashboard-class: only `view` is meaningful for it.
///
/// Matches anywhere in the name, any case ("Dashboard", "OPD dashboard", ...).
pub fn is_dashboard(name: &str) -> bool {
    name.to_ascii_lowercase().contains("dashboard")
}

/// Clamp flags to what the node may legitimately carry.
pub(crate) fn clamp_for_node(name: &str, flags: PermissionFlags) -> PermissionFlags {
    if is_dashboard(name) {
        PermissionFlags {
            view: flags.view,
            ..PermissionFlags::none()
        }
    } else {
        flags
    }
}
