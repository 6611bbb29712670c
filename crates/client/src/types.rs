//! Shared wire and snapshot types.
//!
//! These match the settings/front-office backend's response shapes and must
//! stay free of I/O dependencies; everything here is plain data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use medidesk_core::{LocationId, UserId};

/// A branch (location) the user may operate against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: LocationId,
    pub name: String,
    pub location_code: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub is_active: bool,
}

/// The authenticated user's profile snapshot.
///
/// `primary_location_id` is the location assigned at account creation; it is
/// only a fallback — an explicit branch selection always wins (see
/// `medidesk_auth::location`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    #[serde(default)]
    pub primary_location_id: Option<i64>,
}

/// The user's resolved department for the active branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub department_name: String,
}

impl Department {
    /// Fallback shown when the backend has no department on file.
    pub fn general() -> Self {
        Self {
            department_name: "General".to_string(),
        }
    }
}

/// The three snapshots a successful branch switch replaces together.
///
/// The side-menu and module-access payloads are opaque to this core; they are
/// persisted and handed back to the rendering layer verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchSnapshots {
    #[serde(rename = "userInfo")]
    pub user_profile: UserProfile,
    #[serde(rename = "sidemenu")]
    pub side_menu: Value,
    #[serde(rename = "moduleAccess")]
    pub module_access: Value,
}
