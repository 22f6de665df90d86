//! Request and response bodies of the engine admin API

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cluster health color
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All shards allocated
    Green,
    /// Replicas missing
    Yellow,
    /// Primaries missing
    #[default]
    Red,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Green => write!(f, "green"),
            HealthStatus::Yellow => write!(f, "yellow"),
            HealthStatus::Red => write!(f, "red"),
        }
    }
}

/// `GET /_cluster/health`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterHealth {
    /// Cluster name
    pub cluster_name: String,
    /// Health color
    pub status: HealthStatus,
    /// Nodes in the cluster
    pub number_of_nodes: i64,
    /// Data nodes in the cluster
    pub number_of_data_nodes: i64,
    /// Started shards
    pub active_shards: i64,
    /// Shards moving between nodes
    pub relocating_shards: i64,
    /// Shards being initialized
    pub initializing_shards: i64,
    /// Shards without a node
    pub unassigned_shards: i64,
}

/// One row of `GET /_cat/shards?h=node,index,shard&format=json`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CatShard {
    /// Node holding the shard; unset while unassigned
    #[serde(default)]
    pub node: Option<String>,
    /// Index name
    #[serde(default)]
    pub index: String,
    /// Shard number
    #[serde(default)]
    pub shard: String,
}

/// `GET /_cluster/settings?flat_settings=true`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClusterSettings {
    /// Settings surviving full restarts
    pub persistent: BTreeMap<String, Value>,
    /// Settings lost on full restart
    pub transient: BTreeMap<String, Value>,
}

impl ClusterSettings {
    /// Effective value of a setting; transient wins over persistent
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.transient.get(key).or_else(|| self.persistent.get(key))
    }

    /// Effective value of a setting as a string
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
    }
}

/// Internal user of the security plugin
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UserPayload {
    /// Plain-text password; never returned by the engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Security roles granted directly
    pub opendistro_security_roles: Vec<String>,
    /// Backend roles
    pub backend_roles: Vec<String>,
    /// Free-form attributes
    pub attributes: BTreeMap<String, String>,
}

/// Index permission of a role
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct IndexPermission {
    /// Index patterns
    pub index_patterns: Vec<String>,
    /// Document-level security query
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dls: Option<String>,
    /// Field-level security
    pub fls: Vec<String>,
    /// Masked fields
    pub masked_fields: Vec<String>,
    /// Allowed actions
    pub allowed_actions: Vec<String>,
}

/// Tenant permission of a role
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TenantPermission {
    /// Tenant patterns
    pub tenant_patterns: Vec<String>,
    /// Allowed actions
    pub allowed_actions: Vec<String>,
}

/// Security role
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RolePayload {
    /// Cluster-wide permissions
    pub cluster_permissions: Vec<String>,
    /// Index permissions
    pub index_permissions: Vec<IndexPermission>,
    /// Tenant permissions
    pub tenant_permissions: Vec<TenantPermission>,
}

/// Role mapping: who holds a role
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RoleMappingPayload {
    /// Backend roles mapped onto the role
    pub backend_roles: Vec<String>,
    /// Hosts mapped onto the role
    pub hosts: Vec<String>,
    /// Users mapped onto the role
    pub users: Vec<String>,
    /// Backend roles that must all be held
    pub and_backend_roles: Vec<String>,
}

impl RoleMappingPayload {
    /// Whether nobody is mapped
    pub fn is_empty(&self) -> bool {
        self.backend_roles.is_empty()
            && self.hosts.is_empty()
            && self.users.is_empty()
            && self.and_backend_roles.is_empty()
    }
}

/// Tenant
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TenantPayload {
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Action group
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ActionGroupPayload {
    /// Actions or nested groups
    pub allowed_actions: Vec<String>,
    /// `cluster`, `index` or `kibana`
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Stored search template script
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ScriptPayload {
    /// Script language
    pub lang: String,
    /// Script source
    pub source: String,
}

/// Snapshot repository
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SnapshotRepository {
    /// Repository type (fs, s3, ...)
    #[serde(rename = "type")]
    pub type_: String,
    /// Type-specific settings
    pub settings: BTreeMap<String, Value>,
}

/// Policy document guarded by sequence number and primary term
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VersionedDocument {
    /// Sequence number of the stored document
    pub seq_no: i64,
    /// Primary term of the stored document
    pub primary_term: i64,
    /// Policy body
    pub body: Value,
}
