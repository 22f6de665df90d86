//! Security plugin objects: users, roles, tenants and action groups

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::{debug, warn};

use opensearch_client::compare::payload_eq;
use opensearch_client::types::{
    ActionGroupPayload, IndexPermission, RolePayload, TenantPayload, TenantPermission, UserPayload,
};
use opensearch_client::{OpenSearchClient, SecurityKind};
use opensearch_common::crd::{
    EngineObjectStatus, OpensearchActionGroup, OpensearchRef, OpensearchRole, OpensearchTenant,
    OpensearchUser, RoleSpec,
};
use opensearch_common::events::reasons;
use opensearch_common::kube_utils::secret_value;
use opensearch_common::Error;

use crate::context::Context;
use crate::engine_object::{failure_reason, EngineObject};

/// User attribute carrying the UID of the owning resource
pub const UID_ATTRIBUTE: &str = "k8s-uid";
/// Secret annotation naming the user that reads the password
pub const USER_NAME_ANNOTATION: &str = "opensearchuser/name";
/// Secret annotation naming the namespace of that user
pub const USER_NAMESPACE_ANNOTATION: &str = "opensearchuser/namespace";

const PASSWORD_FIELD: &str = "spec.passwordFrom";

/// A user write and the secret revision its password was read from
#[derive(Clone, Debug)]
pub struct UserWrite {
    /// Engine payload, password included
    pub payload: UserPayload,
    /// `<uid>/<resourceVersion>/<key>` of the password secret
    pub password_version: String,
}

/// Identifies one revision of one key of a secret without its contents
pub fn secret_version(secret: &Secret, key: &str) -> String {
    format!(
        "{}/{}/{}",
        secret.uid().unwrap_or_default(),
        secret.resource_version().unwrap_or_default(),
        key
    )
}

/// Read the password and mark the secret with the user it belongs to
///
/// Returns the password with the version of the secret it came from.
async fn password(user: &OpensearchUser, ctx: &Context) -> Result<(String, String), Error> {
    let namespace = user.namespace().unwrap_or_default();
    let reference = &user.spec.password_from;
    let secret = ctx
        .k8s
        .get::<Secret>(&namespace, &reference.name)
        .await?
        .ok_or_else(|| {
            Error::pending(
                user.name_any(),
                format!("password secret {} not found", reference.name),
            )
        })?;
    let password = secret_value(&secret, &reference.key).ok_or_else(|| {
        Error::validation_for_field(
            user.name_any(),
            PASSWORD_FIELD,
            format!("secret {} has no key {}", reference.name, reference.key),
        )
    })?;

    let wanted = [
        (USER_NAME_ANNOTATION, user.name_any()),
        (USER_NAMESPACE_ANNOTATION, namespace),
    ];
    let annotations = secret.annotations();
    let secret = if wanted
        .iter()
        .any(|(k, v)| annotations.get(*k) != Some(v))
    {
        let mut annotated = secret.clone();
        for (k, v) in wanted {
            annotated.annotations_mut().insert(k.to_string(), v);
        }
        let annotated = ctx.k8s.update(&annotated).await?;
        debug!(secret = %reference.name, "annotated password secret");
        annotated
    } else {
        secret
    };
    Ok((password, secret_version(&secret, &reference.key)))
}

#[async_trait]
impl EngineObject for OpensearchUser {
    const KIND: &'static str = "User";
    type Payload = UserWrite;
    type Current = UserPayload;

    fn opensearch_ref(&self) -> &OpensearchRef {
        &self.spec.opensearch_ref
    }

    fn engine_status(&self) -> Option<&EngineObjectStatus> {
        self.status.as_ref().map(|s| &s.common)
    }

    fn engine_status_mut(&mut self) -> &mut EngineObjectStatus {
        &mut self.status.get_or_insert_with(Default::default).common
    }

    async fn desired(&self, ctx: &Context) -> Result<UserWrite, Error> {
        let mut attributes = self.spec.attributes.clone();
        attributes.insert(UID_ATTRIBUTE.to_string(), self.uid().unwrap_or_default());
        let (password, password_version) = password(self, ctx).await?;
        Ok(UserWrite {
            payload: UserPayload {
                password: Some(password),
                opendistro_security_roles: self.spec.opendistro_security_roles.clone(),
                backend_roles: self.spec.backend_roles.clone(),
                attributes,
            },
            password_version,
        })
    }

    async fn fetch(client: &OpenSearchClient, name: &str) -> Result<Option<UserPayload>, Error> {
        Ok(client.get_user(name).await?)
    }

    /// The engine never returns the password; the secret version in status stands in
    fn in_sync(&self, current: &UserPayload, desired: &UserWrite) -> bool {
        let recorded = self
            .status
            .as_ref()
            .and_then(|s| s.password_version.as_deref());
        let without_password = UserPayload {
            password: None,
            ..desired.payload.clone()
        };
        recorded == Some(desired.password_version.as_str())
            && payload_eq(current, &without_password)
    }

    async fn put(
        client: &OpenSearchClient,
        name: &str,
        _current: Option<&UserPayload>,
        desired: &UserWrite,
    ) -> Result<(), Error> {
        Ok(client.put_user(name, &desired.payload).await?)
    }

    /// Only users carrying this resource's UID are removed
    async fn remove(&self, client: &OpenSearchClient, name: &str) -> Result<bool, Error> {
        let Some(user) = client.get_user(name).await? else {
            return Ok(false);
        };
        if user.attributes.get(UID_ATTRIBUTE) != self.uid().as_ref() {
            warn!(user = %name, "engine user belongs to another resource, leaving it");
            return Ok(false);
        }
        Ok(client.delete_security(SecurityKind::User, name).await?)
    }

    fn record_write(&mut self, desired: &UserWrite) {
        if let Some(status) = self.status.as_mut() {
            status.password_version = Some(desired.password_version.clone());
        }
    }

    fn failure_reason(&self, error: &Error) -> &'static str {
        match error {
            Error::Validation {
                field: Some(field), ..
            } if field == PASSWORD_FIELD => reasons::PASSWORD_ERROR,
            _ => failure_reason(error),
        }
    }
}

fn role_payload(spec: &RoleSpec) -> RolePayload {
    RolePayload {
        cluster_permissions: spec.cluster_permissions.clone(),
        index_permissions: spec
            .index_permissions
            .iter()
            .map(|p| IndexPermission {
                index_patterns: p.index_patterns.clone(),
                dls: p.dls.clone(),
                fls: p.fls.clone(),
                masked_fields: p.masked_fields.clone(),
                allowed_actions: p.allowed_actions.clone(),
            })
            .collect(),
        tenant_permissions: spec
            .tenant_permissions
            .iter()
            .map(|p| TenantPermission {
                tenant_patterns: p.tenant_patterns.clone(),
                allowed_actions: p.allowed_actions.clone(),
            })
            .collect(),
    }
}

#[async_trait]
impl EngineObject for OpensearchRole {
    const KIND: &'static str = "Role";
    type Payload = RolePayload;
    type Current = RolePayload;

    fn opensearch_ref(&self) -> &OpensearchRef {
        &self.spec.opensearch_ref
    }

    fn engine_status(&self) -> Option<&EngineObjectStatus> {
        self.status.as_ref()
    }

    fn engine_status_mut(&mut self) -> &mut EngineObjectStatus {
        self.status.get_or_insert_with(Default::default)
    }

    async fn desired(&self, _ctx: &Context) -> Result<RolePayload, Error> {
        Ok(role_payload(&self.spec))
    }

    async fn fetch(client: &OpenSearchClient, name: &str) -> Result<Option<RolePayload>, Error> {
        Ok(client.get_role(name).await?)
    }

    fn in_sync(&self, current: &RolePayload, desired: &RolePayload) -> bool {
        payload_eq(current, desired)
    }

    async fn put(
        client: &OpenSearchClient,
        name: &str,
        _current: Option<&RolePayload>,
        desired: &RolePayload,
    ) -> Result<(), Error> {
        Ok(client.put_role(name, desired).await?)
    }

    async fn remove(&self, client: &OpenSearchClient, name: &str) -> Result<bool, Error> {
        Ok(client.delete_security(SecurityKind::Role, name).await?)
    }
}

#[async_trait]
impl EngineObject for OpensearchTenant {
    const KIND: &'static str = "Tenant";
    type Payload = TenantPayload;
    type Current = TenantPayload;

    fn opensearch_ref(&self) -> &OpensearchRef {
        &self.spec.opensearch_ref
    }

    fn engine_status(&self) -> Option<&EngineObjectStatus> {
        self.status.as_ref()
    }

    fn engine_status_mut(&mut self) -> &mut EngineObjectStatus {
        self.status.get_or_insert_with(Default::default)
    }

    async fn desired(&self, _ctx: &Context) -> Result<TenantPayload, Error> {
        Ok(TenantPayload {
            description: self.spec.description.clone(),
        })
    }

    async fn fetch(client: &OpenSearchClient, name: &str) -> Result<Option<TenantPayload>, Error> {
        Ok(client.get_tenant(name).await?)
    }

    fn in_sync(&self, current: &TenantPayload, desired: &TenantPayload) -> bool {
        payload_eq(current, desired)
    }

    async fn put(
        client: &OpenSearchClient,
        name: &str,
        _current: Option<&TenantPayload>,
        desired: &TenantPayload,
    ) -> Result<(), Error> {
        Ok(client.put_tenant(name, desired).await?)
    }

    async fn remove(&self, client: &OpenSearchClient, name: &str) -> Result<bool, Error> {
        Ok(client.delete_security(SecurityKind::Tenant, name).await?)
    }
}

#[async_trait]
impl EngineObject for OpensearchActionGroup {
    const KIND: &'static str = "ActionGroup";
    type Payload = ActionGroupPayload;
    type Current = ActionGroupPayload;

    fn opensearch_ref(&self) -> &OpensearchRef {
        &self.spec.opensearch_ref
    }

    fn engine_status(&self) -> Option<&EngineObjectStatus> {
        self.status.as_ref()
    }

    fn engine_status_mut(&mut self) -> &mut EngineObjectStatus {
        self.status.get_or_insert_with(Default::default)
    }

    async fn desired(&self, _ctx: &Context) -> Result<ActionGroupPayload, Error> {
        Ok(ActionGroupPayload {
            allowed_actions: self.spec.allowed_actions.clone(),
            type_: self.spec.type_.clone(),
            description: self.spec.description.clone(),
        })
    }

    async fn fetch(client: &OpenSearchClient, name: &str) -> Result<Option<ActionGroupPayload>, Error> {
        Ok(client.get_action_group(name).await?)
    }

    fn in_sync(&self, current: &ActionGroupPayload, desired: &ActionGroupPayload) -> bool {
        payload_eq(current, desired)
    }

    async fn put(
        client: &OpenSearchClient,
        name: &str,
        _current: Option<&ActionGroupPayload>,
        desired: &ActionGroupPayload,
    ) -> Result<(), Error> {
        Ok(client.put_action_group(name, desired).await?)
    }

    async fn remove(&self, client: &OpenSearchClient, name: &str) -> Result<bool, Error> {
        Ok(client.delete_security(SecurityKind::ActionGroup, name).await?)
    }
}
