//! Shared types used across CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to an OpenSearchCluster in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct OpensearchRef {
    /// Name of the OpenSearchCluster
    pub name: String,
}

/// Reference to a Secret in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
}

/// Reference to one key of a Secret in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretKeyRef {
    /// Secret name
    pub name: String,
    /// Key within the secret
    pub key: String,
}

/// Terminal state written by the deferred status update of every in-engine
/// object reconcile
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ResourceState {
    /// Waiting on the cluster
    Pending,
    /// In sync with the engine
    Created,
    /// Last reconcile failed
    Error,
    /// Pre-existing in the engine; observed only
    Ignored,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Created => write!(f, "Created"),
            Self::Error => write!(f, "Error"),
            Self::Ignored => write!(f, "Ignored"),
        }
    }
}

/// Status shared by every in-engine object resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineObjectStatus {
    /// Result of the last reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ResourceState>,

    /// Human-readable cause of the state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// UID of the cluster this resource was first bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_cluster: Option<String>,

    /// Whether the object already existed in the engine when first observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing: Option<bool>,

    /// Engine-side name recorded on first creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_name: Option<String>,
}

/// Per-subsystem state variable stored in the cluster status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Subsystem owning the entry (Scaler, Restarter, Upgrader)
    pub component: String,
    /// Subsystem-specific state
    pub status: String,
    /// Discriminator within the subsystem, usually a node pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form detail
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
}

impl ComponentStatus {
    /// Build an entry for a component with an optional description
    pub fn new(component: &str, status: &str, description: Option<&str>) -> Self {
        Self {
            component: component.to_string(),
            status: status.to_string(),
            description: description.map(str::to_string),
            conditions: Vec::new(),
        }
    }
}

/// Component names and their states
pub mod components {
    /// Node pool scaling
    pub const SCALER: &str = "Scaler";
    /// Excluded from allocation, waiting for shards to move
    pub const EXCLUDED: &str = "Excluded";
    /// No shards left on the outgoing node
    pub const DRAINED: &str = "Drained";

    /// Rolling restart
    pub const RESTARTER: &str = "Restarter";
    /// A restart is rolling through the pools
    pub const IN_PROGRESS: &str = "InProgress";
    /// Last restart completed
    pub const FINISHED: &str = "Finished";

    /// Version upgrade
    pub const UPGRADER: &str = "Upgrader";
    /// Pool selected but not started
    pub const PENDING: &str = "Pending";
    /// Pool pods are being replaced
    pub const UPGRADING: &str = "Upgrading";
    /// Pool runs the new version
    pub const UPGRADED: &str = "Upgraded";
}
