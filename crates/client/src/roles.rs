//! Role and permission editing flows.
//!
//! Permissions for a role are always persisted as a full replacement of the
//! role's record list — there is no diff-and-patch path. On failure the
//! caller keeps its matrix (the draft) and can retry without re-entering
//! anything.

use std::sync::Arc;

use uuid::Uuid;

use medidesk_auth::{Permission, PermissionMatrix, Role, RoleDraft};
use medidesk_core::RoleId;

use crate::api::FrontOfficeApi;
use crate::error::{FetchError, FetchResult};
use crate::session::SessionStore;

/// Location-scoped role listing and permission persistence.
pub struct RoleService {
    api: Arc<dyn FrontOfficeApi>,
    session: SessionStore,
}

impl RoleService {
    pub fn new(api: Arc<dyn FrontOfficeApi>, session: SessionStore) -> Self {
        Self { api, session }
    }

    /// Roles for the active location. Requires a tenant context.
    pub async fn list(&self) -> FetchResult<Vec<Role>> {
        let location = self
            .session
            .resolve_active_location()
            .await?
            .ok_or(FetchError::NoLocation)?;
        let token = self.session.token().await?;
        self.api.roles(&location, token.as_deref()).await
    }

    /// Matrix for a read-only dialog: zero-permission rows are suppressed.
    pub async fn view_matrix(&self, role_id: RoleId) -> FetchResult<PermissionMatrix> {
        let token = self.session.token().await?;
        let tree = self.api.role_permissions(role_id, token.as_deref()).await?;
        Ok(PermissionMatrix::for_view(role_id, &tree))
    }

    /// Matrix for the edit grid: a row for every grantable node.
    pub async fn edit_matrix(&self, role_id: RoleId) -> FetchResult<PermissionMatrix> {
        let token = self.session.token().await?;
        let tree = self.api.role_permissions(role_id, token.as_deref()).await?;
        Ok(PermissionMatrix::for_edit(role_id, &tree))
    }

    /// Replace the role's entire permission set with the matrix contents.
    pub async fn save(&self, matrix: &PermissionMatrix) -> FetchResult<()> {
        let save_id = Uuid::now_v7();
        let token = self.session.token().await?;
        tracing::info!(
            %save_id,
            role = %matrix.role_id(),
            records = matrix.records().len(),
            "replacing role permissions"
        );
        self.api
            .replace_role_permissions(matrix.role_id(), matrix.records(), token.as_deref())
            .await
            .inspect_err(|err| {
                tracing::error!(%save_id, error = %err, "permission save failed; draft preserved for retry");
            })
    }

    /// Create a role, then persist the record list tagged with the new id.
    ///
    /// If the permission replace fails the role itself exists; the created
    /// role id is logged so a retry can go through [`Self::save`].
    pub async fn create_with_permissions(
        &self,
        draft: &RoleDraft,
        records: &[Permission],
    ) -> FetchResult<Role> {
        let save_id = Uuid::now_v7();
        let token = self.session.token().await?;

        let role = self.api.create_role(draft, token.as_deref()).await?;
        tracing::info!(%save_id, role = %role.id, name = %role.name, "created role");

        let tagged: Vec<Permission> = records
            .iter()
            .cloned()
            .map(|mut record| {
                record.role_id = role.id;
                record
            })
            .collect();

        self.api
            .replace_role_permissions(role.id, &tagged, token.as_deref())
            .await
            .inspect_err(|err| {
                tracing::error!(
                    %save_id,
                    role = %role.id,
                    error = %err,
                    "permission save for new role failed; retry against this role id"
                );
            })?;

        Ok(role)
    }

    /// Rename/activate a role.
    pub async fn update(&self, role_id: RoleId, draft: &RoleDraft) -> FetchResult<Role> {
        let token = self.session.token().await?;
        self.api.update_role(role_id, draft, token.as_deref()).await
    }
}
