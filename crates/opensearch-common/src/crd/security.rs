//! Security plugin object CRDs
//!
//! Users, roles, role mappings, tenants and action groups. Each resource
//! names its cluster through `opensearchRef` and is reconciled into the
//! engine's security REST API.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{EngineObjectStatus, OpensearchRef, SecretKeyRef};

/// An internal user
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opensearch.opster.io",
    version = "v1",
    kind = "OpensearchUser",
    plural = "opensearchusers",
    namespaced,
    status = "UserStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Cluster the user lives in
    pub opensearch_ref: OpensearchRef,
    /// Secret key holding the password
    pub password_from: SecretKeyRef,
    /// Security roles assigned directly
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub opendistro_security_roles: Vec<String>,
    /// Backend roles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backend_roles: Vec<String>,
    /// Custom attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Status of a user
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    /// Shared in-engine object status
    #[serde(flatten)]
    pub common: EngineObjectStatus,
    /// `<uid>/<resourceVersion>/<key>` of the password secret last written;
    /// the engine never returns the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_version: Option<String>,
}

/// Index-level permissions of a role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexPermissionSpec {
    /// Index patterns
    #[serde(default)]
    pub index_patterns: Vec<String>,
    /// Document-level security query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dls: Option<String>,
    /// Field-level security
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fls: Vec<String>,
    /// Allowed actions
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    /// Masked fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masked_fields: Vec<String>,
}

/// Tenant-level permissions of a role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantPermissionSpec {
    /// Tenant patterns
    #[serde(default)]
    pub tenant_patterns: Vec<String>,
    /// Allowed actions
    #[serde(default)]
    pub allowed_actions: Vec<String>,
}

/// A security role
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opensearch.opster.io",
    version = "v1",
    kind = "OpensearchRole",
    plural = "opensearchroles",
    namespaced,
    status = "EngineObjectStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Existing","type":"boolean","jsonPath":".status.existing"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    /// Cluster the role lives in
    pub opensearch_ref: OpensearchRef,
    /// Cluster-wide permissions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_permissions: Vec<String>,
    /// Index permissions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub index_permissions: Vec<IndexPermissionSpec>,
    /// Tenant permissions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tenant_permissions: Vec<TenantPermissionSpec>,
}

/// Binds users and backend roles to engine roles
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opensearch.opster.io",
    version = "v1",
    kind = "OpensearchUserRoleBinding",
    plural = "opensearchuserrolebindings",
    namespaced,
    status = "UserRoleBindingStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleBindingSpec {
    /// Cluster holding the role mappings
    pub opensearch_ref: OpensearchRef,
    /// Engine roles to bind
    pub roles: Vec<String>,
    /// Users bound to every role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    /// Backend roles bound to every role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backend_roles: Vec<String>,
}

/// Status of a user-role binding
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleBindingStatus {
    /// Shared in-engine object status
    #[serde(flatten)]
    pub common: EngineObjectStatus,
    /// Roles whose mappings carry this binding's entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provisioned_roles: Vec<String>,
    /// Users written into those mappings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provisioned_users: Vec<String>,
    /// Backend roles written into those mappings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provisioned_backend_roles: Vec<String>,
}

/// A tenant
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opensearch.opster.io",
    version = "v1",
    kind = "OpensearchTenant",
    plural = "opensearchtenants",
    namespaced,
    status = "EngineObjectStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Cluster the tenant lives in
    pub opensearch_ref: OpensearchRef,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named group of permissions
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opensearch.opster.io",
    version = "v1",
    kind = "OpensearchActionGroup",
    plural = "opensearchactiongroups",
    namespaced,
    status = "EngineObjectStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ActionGroupSpec {
    /// Cluster the action group lives in
    pub opensearch_ref: OpensearchRef,
    /// Permissions and nested groups
    pub allowed_actions: Vec<String>,
    /// cluster, index or kibana
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
