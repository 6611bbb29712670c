//! Role model.

use serde::{Deserialize, Serialize};

use medidesk_core::{LocationId, RoleId};

/// A role as reported by the settings backend.
///
/// Roles are location-scoped: a role created for one branch is not listed
/// when operating under another. `modules` is display-only — the names of
/// modules the role currently holds any nonzero grant for, derived by the
/// backend when `includeModules` is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub location_id: LocationId,
    pub is_active: bool,
    #[serde(default)]
    pub modules: Vec<String>,
}

/// Payload for role creation and rename/activate updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDraft {
    pub name: String,
    pub location_id: LocationId,
    pub is_active: bool,
}

impl RoleDraft {
    pub fn new(name: impl Into<String>, location_id: LocationId) -> Self {
        Self {
            name: name.into(),
            location_id,
            is_active: true,
        }
    }
}
