//! Policy CRDs: index state management and snapshot management

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{EngineObjectStatus, OpensearchRef};
use super::{preserve_unknown_fields, preserve_unknown_fields_list};

/// Transition to another state
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IsmTransition {
    /// Target state
    pub state_name: String,
    /// Conditions (min_index_age, min_doc_count, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub conditions: Option<serde_json::Value>,
}

/// One state of an ISM policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IsmState {
    /// State name
    pub name: String,
    /// Actions, in engine syntax
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "preserve_unknown_fields_list")]
    pub actions: Vec<serde_json::Value>,
    /// Transitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<IsmTransition>,
}

/// Automatic policy attachment to new indices
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IsmTemplate {
    /// Index patterns
    pub index_patterns: Vec<String>,
    /// Priority among matching templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

/// An index state management policy
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opensearch.opster.io",
    version = "v1",
    kind = "OpenSearchISMPolicy",
    plural = "opensearchismpolicies",
    namespaced,
    status = "EngineObjectStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IsmPolicySpec {
    /// Cluster the policy lives in
    pub opensearch_ref: OpensearchRef,
    /// Policy id; the resource name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Initial state
    pub default_state: String,
    /// States
    pub states: Vec<IsmState>,
    /// Attachment templates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ism_template: Vec<IsmTemplate>,
    /// Error notification channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub error_notification: Option<serde_json::Value>,
}

/// Cron expression
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronExpression {
    /// Cron expression
    pub expression: String,
    /// IANA timezone
    pub timezone: String,
}

/// Schedule of a snapshot policy step
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronSchedule {
    /// Cron schedule
    pub cron: CronExpression,
}

/// Snapshot contents
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConfig {
    /// Repository to write into
    pub repository: String,
    /// Indices, comma separated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<String>,
    /// Date format of snapshot names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    /// Timezone of snapshot names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format_timezone: Option<String>,
    /// Skip missing indices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_unavailable: Option<bool>,
    /// Include cluster state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_global_state: Option<bool>,
    /// Allow partial snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
    /// Snapshot metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Snapshot creation schedule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCreation {
    /// Schedule
    pub schedule: CronSchedule,
    /// Time limit (e.g. 1h)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<String>,
}

/// Snapshot deletion conditions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeletionCondition {
    /// Maximum snapshot age
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
    /// Maximum snapshots kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<i64>,
    /// Minimum snapshots kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_count: Option<i64>,
}

/// Snapshot deletion schedule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDeletion {
    /// Schedule; the creation schedule when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<CronSchedule>,
    /// Conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<DeletionCondition>,
    /// Time limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<String>,
}

/// A snapshot management policy
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opensearch.opster.io",
    version = "v1",
    kind = "OpensearchSnapshotPolicy",
    plural = "opensearchsnapshotpolicies",
    namespaced,
    status = "EngineObjectStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPolicySpec {
    /// Cluster the policy lives in
    pub opensearch_ref: OpensearchRef,
    /// Engine-side policy name
    pub policy_name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the policy runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Snapshot contents
    pub snapshot_config: SnapshotConfig,
    /// Creation schedule
    pub creation: SnapshotCreation,
    /// Deletion schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion: Option<SnapshotDeletion>,
    /// Notification settings, in engine syntax
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub notification: Option<serde_json::Value>,
}
