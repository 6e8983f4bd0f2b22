use couchkit_core::http::Method;
use couchkit_core::models::{encode_roles, RawRoleDescription, RawUserMetadata};
use couchkit_core::{
    AuthDomain, Error, FormBody, Group, Result, RoleAndDescription, ServiceType, User,
    UserAndMetadata,
};

use crate::mgmt::{expect_success, HttpDispatcher};
use crate::options::RequestOptions;

fn user_error(status: u16, message: String) -> Error {
    Error::UserManagement { status, message }
}

/// Options for operations on users, which live in an authentication domain
#[derive(Debug, Clone, Default)]
pub struct UserOptions {
    pub request: RequestOptions,
    /// Defaults to the local domain
    pub domain: Option<AuthDomain>,
}

impl UserOptions {
    pub fn domain(mut self, domain: AuthDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    fn domain_name(&self) -> &'static str {
        self.domain.unwrap_or_default().as_str()
    }
}

/// UserManager manages RBAC users, roles and groups
#[derive(Clone)]
pub struct UserManager {
    dispatcher: HttpDispatcher,
}

impl UserManager {
    pub(crate) fn new(dispatcher: HttpDispatcher) -> Self {
        Self { dispatcher }
    }

    async fn get(&self, path: String, opts: &RequestOptions) -> Result<couchkit_core::HttpResponse> {
        let req = self
            .dispatcher
            .request(ServiceType::Management, Method::Get, path, opts);
        let resp = self.dispatcher.send(req).await?;
        expect_success(&resp, user_error)?;
        Ok(resp)
    }

    async fn send_without_body(
        &self,
        method: Method,
        path: String,
        form: Option<&FormBody>,
        opts: &RequestOptions,
    ) -> Result<()> {
        let mut req = self
            .dispatcher
            .request(ServiceType::Management, method, path, opts);
        if let Some(form) = form {
            req = req.with_form(form)?;
        }
        let resp = self.dispatcher.send(req).await?;
        expect_success(&resp, user_error)
    }

    #[tracing::instrument(skip_all, fields(service = "mgmt"))]
    pub async fn get_all_users(&self, opts: &UserOptions) -> Result<Vec<UserAndMetadata>> {
        let resp = self
            .get(
                format!("/settings/rbac/users/{}", opts.domain_name()),
                &opts.request,
            )
            .await?;
        let raw: Vec<RawUserMetadata> = resp.json()?;
        Ok(raw.into_iter().map(UserAndMetadata::from).collect())
    }

    #[tracing::instrument(skip(self, opts), fields(service = "mgmt"))]
    pub async fn get_user(&self, name: &str, opts: &UserOptions) -> Result<UserAndMetadata> {
        let resp = self
            .get(
                format!("/settings/rbac/users/{}/{}", opts.domain_name(), name),
                &opts.request,
            )
            .await?;
        let raw: RawUserMetadata = resp.json()?;
        Ok(raw.into())
    }

    /// Create or replace a user. Only the directly assigned roles are sent.
    #[tracing::instrument(skip_all, fields(service = "mgmt", user = %user.username))]
    pub async fn upsert_user(&self, user: &User, opts: &UserOptions) -> Result<()> {
        if user.username.is_empty() {
            return Err(Error::invalid_argument("username cannot be empty"));
        }

        let mut form = FormBody::new();
        form.add("name", user.display_name.as_str());
        if let Some(password) = &user.password {
            form.add("password", password.as_str());
        }
        if !user.groups.is_empty() {
            form.add("groups", user.groups.join(","));
        }
        form.add("roles", encode_roles(&user.roles));

        self.send_without_body(
            Method::Put,
            format!(
                "/settings/rbac/users/{}/{}",
                opts.domain_name(),
                user.username
            ),
            Some(&form),
            &opts.request,
        )
        .await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "mgmt"))]
    pub async fn drop_user(&self, name: &str, opts: &UserOptions) -> Result<()> {
        self.send_without_body(
            Method::Delete,
            format!("/settings/rbac/users/{}/{}", opts.domain_name(), name),
            None,
            &opts.request,
        )
        .await
    }

    /// Every role the cluster knows about
    #[tracing::instrument(skip_all, fields(service = "mgmt"))]
    pub async fn get_roles(&self, opts: &RequestOptions) -> Result<Vec<RoleAndDescription>> {
        let resp = self.get("/settings/rbac/roles".to_string(), opts).await?;
        let raw: Vec<RawRoleDescription> = resp.json()?;
        Ok(raw.into_iter().map(RoleAndDescription::from).collect())
    }

    #[tracing::instrument(skip(self, opts), fields(service = "mgmt"))]
    pub async fn get_group(&self, name: &str, opts: &RequestOptions) -> Result<Group> {
        if name.is_empty() {
            return Err(Error::invalid_argument("group name cannot be empty"));
        }
        let resp = self
            .get(format!("/settings/rbac/groups/{}", name), opts)
            .await?;
        resp.json()
    }

    #[tracing::instrument(skip_all, fields(service = "mgmt"))]
    pub async fn get_all_groups(&self, opts: &RequestOptions) -> Result<Vec<Group>> {
        let resp = self.get("/settings/rbac/groups".to_string(), opts).await?;
        resp.json()
    }

    #[tracing::instrument(skip_all, fields(service = "mgmt", group = %group.name))]
    pub async fn upsert_group(&self, group: &Group, opts: &RequestOptions) -> Result<()> {
        if group.name.is_empty() {
            return Err(Error::invalid_argument("group name cannot be empty"));
        }

        let mut form = FormBody::new();
        form.add("description", group.description.as_str());
        form.add("ldap_group_ref", group.ldap_group_reference.as_str());
        form.add("roles", encode_roles(&group.roles));

        self.send_without_body(
            Method::Put,
            format!("/settings/rbac/groups/{}", group.name),
            Some(&form),
            opts,
        )
        .await
    }

    #[tracing::instrument(skip(self, opts), fields(service = "mgmt"))]
    pub async fn drop_group(&self, name: &str, opts: &RequestOptions) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("group name cannot be empty"));
        }
        self.send_without_body(
            Method::Delete,
            format!("/settings/rbac/groups/{}", name),
            None,
            opts,
        )
        .await
    }
}
