//! In-process fake of the settings backend for tests.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use medidesk_auth::{ModuleNode, Permission, PermissionFlags, Role, RoleDraft, SubModuleNode};
use medidesk_core::{LocationId, ModuleId, RoleId, SubModuleId, UserId};

use crate::api::FrontOfficeApi;
use crate::error::{FetchError, FetchResult};
use crate::types::{Branch, Department, SwitchSnapshots, UserProfile};

/// Scriptable [`FrontOfficeApi`] with call counters and failure switches.
#[derive(Default)]
pub(crate) struct MockApi {
    pub branches: Mutex<Vec<Branch>>,
    pub branch_calls: AtomicUsize,

    pub switch_calls: AtomicUsize,
    pub fail_switch: AtomicBool,

    pub department_calls: AtomicUsize,
    pub department_gate: Mutex<Option<Arc<Notify>>>,
    pub fail_department: AtomicBool,

    pub roles: Mutex<Vec<Role>>,
    pub next_role_id: AtomicI64,
    pub tree: Mutex<Vec<ModuleNode>>,
    pub saved: Mutex<Option<(RoleId, Vec<Permission>)>>,
    pub fail_permission_save: AtomicBool,
}

impl MockApi {
    pub fn with_branches(branches: Vec<Branch>) -> Self {
        let api = Self::default();
        *api.branches.lock().unwrap() = branches;
        api
    }

    pub fn seed_role(&self, name: &str, location: &str) {
        let id = 100 + self.next_role_id.fetch_add(1, Ordering::SeqCst);
        self.roles.lock().unwrap().push(Role {
            id: RoleId::new(id),
            name: name.to_string(),
            location_id: LocationId::new(location),
            is_active: true,
            modules: Vec::new(),
        });
    }
}

#[async_trait]
impl FrontOfficeApi for MockApi {
    async fn user_branches(&self, _token: Option<&str>) -> FetchResult<Vec<Branch>> {
        self.branch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.branches.lock().unwrap().clone())
    }

    async fn switch_location(
        &self,
        user_id: UserId,
        location_id: &LocationId,
        _token: Option<&str>,
    ) -> FetchResult<SwitchSnapshots> {
        self.switch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_switch.load(Ordering::SeqCst) {
            return Err(FetchError::Api(500, "switch failed".to_string()));
        }
        Ok(SwitchSnapshots {
            user_profile: UserProfile {
                id: user_id,
                display_name: "Dr. Osei".to_string(),
                email: "osei@medidesk.test".to_string(),
                primary_location_id: location_id.as_str().parse().ok(),
            },
            side_menu: serde_json::json!([{"label": "Front Office", "location": location_id}]),
            module_access: serde_json::json!({"location": location_id}),
        })
    }

    async fn user_department(
        &self,
        _user_id: UserId,
        _location_id: &LocationId,
        _token: Option<&str>,
    ) -> FetchResult<Department> {
        self.department_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.department_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_department.load(Ordering::SeqCst) {
            return Err(FetchError::Api(503, "department unavailable".to_string()));
        }
        Ok(Department {
            department_name: "Cardiology".to_string(),
        })
    }

    async fn roles(
        &self,
        location_id: &LocationId,
        _token: Option<&str>,
    ) -> FetchResult<Vec<Role>> {
        Ok(self
            .roles
            .lock()
            .unwrap()
            .iter()
            .filter(|role| role.location_id == *location_id)
            .cloned()
            .collect())
    }

    async fn role_permissions(
        &self,
        _role_id: RoleId,
        _token: Option<&str>,
    ) -> FetchResult<Vec<ModuleNode>> {
        Ok(self.tree.lock().unwrap().clone())
    }

    async fn replace_role_permissions(
        &self,
        role_id: RoleId,
        records: &[Permission],
        _token: Option<&str>,
    ) -> FetchResult<()> {
        if self.fail_permission_save.load(Ordering::SeqCst) {
            return Err(FetchError::Api(500, "permission save failed".to_string()));
        }
        *self.saved.lock().unwrap() = Some((role_id, records.to_vec()));
        Ok(())
    }

    async fn create_role(&self, draft: &RoleDraft, _token: Option<&str>) -> FetchResult<Role> {
        let id = 100 + self.next_role_id.fetch_add(1, Ordering::SeqCst);
        let role = Role {
            id: RoleId::new(id),
            name: draft.name.clone(),
            location_id: draft.location_id.clone(),
            is_active: draft.is_active,
            modules: Vec::new(),
        };
        self.roles.lock().unwrap().push(role.clone());
        Ok(role)
    }

    async fn update_role(
        &self,
        role_id: RoleId,
        draft: &RoleDraft,
        _token: Option<&str>,
    ) -> FetchResult<Role> {
        let mut roles = self.roles.lock().unwrap();
        let Some(role) = roles.iter_mut().find(|r| r.id == role_id) else {
            return Err(FetchError::Api(404, "role not found".to_string()));
        };
        role.name = draft.name.clone();
        role.is_active = draft.is_active;
        Ok(role.clone())
    }
}

pub(crate) fn branch(id: &str, name: &str) -> Branch {
    Branch {
        id: LocationId::new(id),
        name: name.to_string(),
        location_code: format!("LC{id}"),
        address: None,
        phone: None,
        email: None,
        is_active: true,
    }
}

pub(crate) fn test_profile(primary: Option<i64>) -> UserProfile {
    UserProfile {
        id: UserId::new(5),
        display_name: "Dr. Osei".to_string(),
        email: "osei@medidesk.test".to_string(),
        primary_location_id: primary,
    }
}

pub(crate) fn test_tree() -> Vec<ModuleNode> {
    vec![
        ModuleNode {
            id: ModuleId::new(1),
            name: "Front Office".to_string(),
            sub_modules: vec![
                SubModuleNode {
                    id: SubModuleId::new(10),
                    module_id: ModuleId::new(1),
                    name: "Appointments".to_string(),
                    flags: Some(PermissionFlags::all()),
                },
                SubModuleNode {
                    id: SubModuleId::new(11),
                    module_id: ModuleId::new(1),
                    name: "Registrations".to_string(),
                    flags: None,
                },
            ],
            flags: None,
        },
        ModuleNode {
            id: ModuleId::new(2),
            name: "Reports Dashboard".to_string(),
            sub_modules: vec![],
            flags: Some(PermissionFlags::all()),
        },
        ModuleNode {
            id: ModuleId::new(3),
            name: "Pharmacy".to_string(),
            sub_modules: vec![],
            flags: None,
        },
    ]
}
