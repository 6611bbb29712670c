//! Typed surface of the settings/front-office backend.
//!
//! The trait is the seam the branch, department and role flows are built
//! against; tests exercise those flows with an in-process fake. [`HttpApi`]
//! is the real thing: one shared reqwest client, bearer auth attached only
//! when the session has a token, every response mapped into [`FetchError`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use medidesk_auth::{ModuleNode, Permission, Role, RoleDraft};
use medidesk_core::{LocationId, RoleId, UserId};

use crate::error::{FetchError, FetchResult};
use crate::types::{Branch, Department, SwitchSnapshots};

/// Remote operations the client core depends on.
#[async_trait]
pub trait FrontOfficeApi: Send + Sync {
    /// `GET /locations/user-branches`
    async fn user_branches(&self, token: Option<&str>) -> FetchResult<Vec<Branch>>;

    /// `POST /auth/switch-location`. Any non-success status is a failed
    /// switch; the caller must not replace its snapshots.
    async fn switch_location(
        &self,
        user_id: UserId,
        location_id: &LocationId,
        token: Option<&str>,
    ) -> FetchResult<SwitchSnapshots>;

    /// `GET /settings/users/{id}/department?locationId=`
    async fn user_department(
        &self,
        user_id: UserId,
        location_id: &LocationId,
        token: Option<&str>,
    ) -> FetchResult<Department>;

    /// `GET /settings/roles?locationId=&includeModules=true`
    async fn roles(&self, location_id: &LocationId, token: Option<&str>)
    -> FetchResult<Vec<Role>>;

    /// `GET /settings/roles/{id}/permissions` — the annotated module tree.
    async fn role_permissions(
        &self,
        role_id: RoleId,
        token: Option<&str>,
    ) -> FetchResult<Vec<ModuleNode>>;

    /// `PUT /settings/roles/{id}/permissions` — full replace, idempotent.
    async fn replace_role_permissions(
        &self,
        role_id: RoleId,
        records: &[Permission],
        token: Option<&str>,
    ) -> FetchResult<()>;

    /// `POST /settings/roles`
    async fn create_role(&self, draft: &RoleDraft, token: Option<&str>) -> FetchResult<Role>;

    /// `PATCH /settings/roles/{id}`
    async fn update_role(
        &self,
        role_id: RoleId,
        draft: &RoleDraft,
        token: Option<&str>,
    ) -> FetchResult<Role>;
}

/// reqwest-backed [`FrontOfficeApi`].
#[derive(Debug, Clone)]
pub struct HttpApi {
    base_url: String,
    client: Client,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_auth(req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn read_json<T: DeserializeOwned>(req: RequestBuilder) -> FetchResult<T> {
        let resp = Self::check(req).await?;
        resp.json::<T>()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))
    }

    async fn check(req: RequestBuilder) -> FetchResult<reqwest::Response> {
        let resp = req.send().await.map_err(map_transport_error)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Api(status.as_u16(), body));
        }
        Ok(resp)
    }
}

fn map_transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err.to_string())
    }
}

#[async_trait]
impl FrontOfficeApi for HttpApi {
    async fn user_branches(&self, token: Option<&str>) -> FetchResult<Vec<Branch>> {
        let req = Self::with_auth(self.client.get(self.url("/locations/user-branches")), token);
        Self::read_json(req).await
    }

    async fn switch_location(
        &self,
        user_id: UserId,
        location_id: &LocationId,
        token: Option<&str>,
    ) -> FetchResult<SwitchSnapshots> {
        let req = Self::with_auth(self.client.post(self.url("/auth/switch-location")), token)
            .json(&serde_json::json!({
                "userId": user_id,
                "locationId": location_id,
            }));
        Self::read_json(req).await
    }

    async fn user_department(
        &self,
        user_id: UserId,
        location_id: &LocationId,
        token: Option<&str>,
    ) -> FetchResult<Department> {
        let path = format!("/settings/users/{}/department", user_id);
        let req = Self::with_auth(self.client.get(self.url(&path)), token)
            .query(&[("locationId", location_id.as_str())]);
        Self::read_json(req).await
    }

    async fn roles(
        &self,
        location_id: &LocationId,
        token: Option<&str>,
    ) -> FetchResult<Vec<Role>> {
        let req = Self::with_auth(self.client.get(self.url("/settings/roles")), token).query(&[
            ("locationId", location_id.as_str()),
            ("includeModules", "true"),
        ]);
        Self::read_json(req).await
    }

    async fn role_permissions(
        &self,
        role_id: RoleId,
        token: Option<&str>,
    ) -> FetchResult<Vec<ModuleNode>> {
        let path = format!("/settings/roles/{}/permissions", role_id);
        let req = Self::with_auth(self.client.get(self.url(&path)), token);
        Self::read_json(req).await
    }

    async fn replace_role_permissions(
        &self,
        role_id: RoleId,
        records: &[Permission],
        token: Option<&str>,
    ) -> FetchResult<()> {
        let path = format!("/settings/roles/{}/permissions", role_id);
        let req = Self::with_auth(self.client.put(self.url(&path)), token)
            .json(&serde_json::json!({ "permissions": records }));
        Self::check(req).await?;
        Ok(())
    }

    async fn create_role(&self, draft: &RoleDraft, token: Option<&str>) -> FetchResult<Role> {
        let req =
            Self::with_auth(self.client.post(self.url("/settings/roles")), token).json(draft);
        Self::read_json(req).await
    }

    async fn update_role(
        &self,
        role_id: RoleId,
        draft: &RoleDraft,
        token: Option<&str>,
    ) -> FetchResult<Role> {
        let path = format!("/settings/roles/{}", role_id);
        let req = Self::with_auth(self.client.patch(self.url(&path)), token).json(draft);
        Self::read_json(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let api = HttpApi::new("http://localhost:4000/").unwrap();
        assert_eq!(api.url("/settings/roles"), "http://localhost:4000/settings/roles");
    }
}
