//! OpenSearchCluster Custom Resource Definition
//!
//! The top-level desired state of an engine deployment: node pools, TLS and
//! security configuration, optional dashboards and snapshot repositories.
//! The operator owns every derived object through owner references.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, EmptyDirVolumeSource, EnvVar, HostPathVolumeSource, PodSecurityContext,
    ResourceRequirements, SecurityContext, Toleration,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ComponentStatus, SecretRef};

/// Default HTTP port of the engine
pub const DEFAULT_HTTP_PORT: i32 = 9200;
/// Transport port of the engine
pub const TRANSPORT_PORT: i32 = 9300;
/// Default image repository
pub const DEFAULT_REPOSITORY: &str = "docker.io/opensearchproject";

fn default_http_port() -> i32 {
    DEFAULT_HTTP_PORT
}

fn default_dashboards_replicas() -> i32 {
    1
}

/// Specification for an OpenSearchCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opensearch.opster.io",
    version = "v1",
    kind = "OpenSearchCluster",
    plural = "opensearchclusters",
    shortname = "os",
    namespaced,
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Health","type":"string","jsonPath":".status.health"}"#,
    printcolumn = r#"{"name":"Nodes","type":"integer","jsonPath":".status.availableNodes"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Settings shared by every node
    pub general: GeneralConfig,

    /// Operator behaviour toggles
    #[serde(default)]
    pub conf_mgmt: ConfMgmt,

    /// The single-node pod used to form the cluster
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Optional dashboards deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboards: Option<DashboardsConfig>,

    /// TLS and security plugin configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityConfig>,

    /// Homogeneous groups of nodes, one stateful set each
    pub node_pools: Vec<NodePool>,

    /// Image used by init containers
    #[serde(default)]
    pub init_helper: InitHelperConfig,
}

/// Settings shared by every node
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneralConfig {
    /// Name of the client-facing service
    pub service_name: String,

    /// Engine version
    pub version: String,

    /// HTTP port
    #[serde(default = "default_http_port")]
    pub http_port: i32,

    /// Full image reference; overrides `defaultRepo` and `version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image repository used with `version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_repo: Option<String>,

    /// Image pull policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Run a privileged init container raising vm.max_map_count
    #[serde(default)]
    pub set_vm_max_map_count: bool,

    /// Drain data nodes before restarting them
    #[serde(default)]
    pub drain_data_nodes: bool,

    /// Plugins installed at pod start
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins_list: Vec<String>,

    /// Extra opensearch.yml keys
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_config: BTreeMap<String, String>,

    /// Annotations added to every node pod
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Service account of node pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Type of the client-facing service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,

    /// Snapshot repositories registered once the cluster runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshot_repositories: Vec<SnapshotRepositoryConfig>,

    /// Pod security context of node pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_security_context: Option<PodSecurityContext>,

    /// Container security context of node containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
}

/// Snapshot repository registered in the engine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRepositoryConfig {
    /// Repository name
    pub name: String,
    /// Repository type (fs, s3, ...)
    #[serde(rename = "type")]
    pub type_: String,
    /// Type-specific settings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

/// Operator behaviour toggles
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfMgmt {
    /// Drain shards off a node before removing it
    #[serde(default)]
    pub smart_scaler: bool,
}

/// Bootstrap pod settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfig {
    /// Resources of the bootstrap container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// JVM options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm: Option<String>,
    /// Node selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Tolerations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    /// Affinity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    /// Extra opensearch.yml keys for the bootstrap node, passed as env
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_config: BTreeMap<String, String>,
}

/// A homogeneous set of engine nodes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    /// Pool identifier; part of every derived object name
    pub component: String,
    /// Desired replicas
    pub replicas: i32,
    /// Size of each data volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<String>,
    /// Container resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// JVM options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jvm: Option<String>,
    /// Node roles (cluster_manager, master, data, ingest, ...)
    #[serde(default)]
    pub roles: Vec<String>,
    /// Node selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Tolerations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    /// Affinity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    /// Extra pod labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Extra pod annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Extra container environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Data volume source; a PVC when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistenceConfig>,
    /// Pod disruption budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdb: Option<PdbConfig>,
    /// Extra opensearch.yml keys for this pool, passed as env
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_config: BTreeMap<String, String>,
    /// Priority class of the pool's pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

/// Data volume source
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceConfig {
    /// Persistent volume claim template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<PvcSource>,
    /// Ephemeral storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,
    /// Node-local path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolumeSource>,
}

/// Claim template settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcSource {
    /// Storage class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// Access modes; ReadWriteOnce when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,
}

/// Pod disruption budget settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PdbConfig {
    /// Create the budget
    #[serde(default)]
    pub enable: bool,
    /// Minimum available pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<IntOrString>,
    /// Maximum unavailable pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
}

/// Security plugin configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Security config documents and admin identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SecurityConfigSpec>,
    /// Certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

/// Security config documents and admin identity
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfigSpec {
    /// Secret holding the security YAML documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_config_secret: Option<SecretRef>,
    /// Secret holding the admin client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_secret: Option<SecretRef>,
    /// Secret holding the admin basic-auth credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_credentials_secret: Option<SecretRef>,
    /// Resources of the applier job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_job_resources: Option<ResourceRequirements>,
}

/// Certificates per interface
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Node to node traffic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TlsInterfaceConfig>,
    /// REST traffic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<TlsInterfaceConfig>,
}

/// Certificate source for one interface
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsInterfaceConfig {
    /// Let the operator issue certificates
    #[serde(default)]
    pub generate: bool,
    /// One certificate per pod (transport only)
    #[serde(default)]
    pub per_node: bool,
    /// Secret with tls.crt, tls.key and optionally ca.crt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
    /// Secret with ca.crt (and ca.key when used for signing)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_secret: Option<SecretRef>,
    /// Node DNs accepted on the transport layer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes_dn: Vec<String>,
    /// Admin DNs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin_dn: Vec<String>,
}

/// Dashboards deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardsConfig {
    /// Deploy dashboards
    #[serde(default)]
    pub enable: bool,
    /// Replicas
    #[serde(default = "default_dashboards_replicas")]
    pub replicas: i32,
    /// Dashboards version
    pub version: String,
    /// Full image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Container resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// TLS for the dashboards endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<DashboardsTlsConfig>,
    /// Secret with username and password used to reach the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opensearch_credentials_secret: Option<SecretRef>,
    /// Extra opensearch_dashboards.yml keys
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_config: BTreeMap<String, String>,
    /// URL base path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    /// Service type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

/// Dashboards TLS
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardsTlsConfig {
    /// Serve HTTPS
    #[serde(default)]
    pub enable: bool,
    /// Issue the certificate from the cluster CA
    #[serde(default)]
    pub generate: bool,
    /// Secret with tls.crt and tls.key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretRef>,
}

/// Init container image
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitHelperConfig {
    /// Image; busybox when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// Phase of an OpenSearchCluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClusterPhase {
    /// Derived objects being created, cluster not formed
    #[default]
    Pending,
    /// Cluster formed and reachable
    Running,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
        }
    }
}

/// Observed status of an OpenSearchCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Current phase
    #[serde(default)]
    pub phase: ClusterPhase,

    /// The cluster has formed at least once
    #[serde(default)]
    pub initialized: bool,

    /// Version every pool runs; lags spec during an upgrade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Subsystem state variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components_status: Vec<ComponentStatus>,

    /// Nodes reported by the engine
    #[serde(default)]
    pub available_nodes: i32,

    /// Engine health (green, yellow, red)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
}

impl ClusterStatus {
    /// Find the entry for a component, matching the description when given
    pub fn component(&self, component: &str, description: Option<&str>) -> Option<&ComponentStatus> {
        self.components_status.iter().find(|c| {
            c.component == component
                && (description.is_none() || c.description.as_deref() == description)
        })
    }

    /// Insert or replace the entry with the same component and description
    pub fn set_component(&mut self, entry: ComponentStatus) {
        match self
            .components_status
            .iter_mut()
            .find(|c| c.component == entry.component && c.description == entry.description)
        {
            Some(existing) => *existing = entry,
            None => self.components_status.push(entry),
        }
    }

    /// Remove the entry with the given component and description
    pub fn remove_component(&mut self, component: &str, description: Option<&str>) {
        self.components_status
            .retain(|c| !(c.component == component && c.description.as_deref() == description));
    }

    /// Remove every entry of a component
    pub fn remove_all(&mut self, component: &str) {
        self.components_status.retain(|c| c.component != component);
    }
}

impl NodePool {
    /// Whether the pool carries the given role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Data nodes
    pub fn is_data(&self) -> bool {
        self.has_role("data")
    }

    /// Cluster-manager eligible nodes
    pub fn is_manager(&self) -> bool {
        self.has_role("master") || self.has_role("cluster_manager")
    }
}

impl OpenSearchCluster {
    /// Whether the cluster is formed and reachable
    pub fn is_running(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.phase == ClusterPhase::Running && s.initialized)
            .unwrap_or(false)
    }

    /// Whether the cluster formed at least once
    pub fn is_initialized(&self) -> bool {
        self.status.as_ref().map(|s| s.initialized).unwrap_or(false)
    }

    /// The version recorded in status, if any
    pub fn status_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.version.as_deref())
            .filter(|v| !v.is_empty())
    }

    /// Whether status and spec disagree on the version
    pub fn upgrade_in_progress(&self) -> bool {
        self.status_version()
            .map(|v| v != self.spec.general.version)
            .unwrap_or(false)
    }

    /// Image of the engine at the given version
    pub fn image_for(&self, version: &str) -> String {
        if let Some(image) = &self.spec.general.image {
            return image.clone();
        }
        let repo = self
            .spec
            .general
            .default_repo
            .as_deref()
            .unwrap_or(DEFAULT_REPOSITORY);
        format!("{}/opensearch:{}", repo, version)
    }

    /// Transport TLS settings, if configured
    pub fn transport_tls(&self) -> Option<&TlsInterfaceConfig> {
        self.spec
            .security
            .as_ref()
            .and_then(|s| s.tls.as_ref())
            .and_then(|t| t.transport.as_ref())
    }

    /// HTTP TLS settings, if configured
    pub fn http_tls(&self) -> Option<&TlsInterfaceConfig> {
        self.spec
            .security
            .as_ref()
            .and_then(|s| s.tls.as_ref())
            .and_then(|t| t.http.as_ref())
    }

    /// Security config documents and admin identity, if configured
    pub fn security_config(&self) -> Option<&SecurityConfigSpec> {
        self.spec.security.as_ref().and_then(|s| s.config.as_ref())
    }

    /// Dashboards settings when enabled
    pub fn dashboards(&self) -> Option<&DashboardsConfig> {
        self.spec.dashboards.as_ref().filter(|d| d.enable)
    }
}
