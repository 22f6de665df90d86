//! Template CRDs: index, component and search (stored script) templates

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{EngineObjectStatus, OpensearchRef};
use super::preserve_unknown_fields;

/// An index alias declared by a template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexAlias {
    /// Filter query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub filter: Option<serde_json::Value>,
    /// Index routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_routing: Option<String>,
    /// Search routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_routing: Option<String>,
    /// Routing for both
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    /// Write index of the alias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_write_index: Option<bool>,
}

/// Settings, mappings and aliases applied to matching indices
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateBody {
    /// Index settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub settings: Option<serde_json::Value>,
    /// Field mappings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub mappings: Option<serde_json::Value>,
    /// Aliases
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, IndexAlias>,
}

/// Data stream marker of an index template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataStreamSpec {
    /// Timestamp field; `@timestamp` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_field: Option<String>,
}

/// An index template
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opensearch.opster.io",
    version = "v1",
    kind = "OpensearchIndexTemplate",
    plural = "opensearchindextemplates",
    namespaced,
    status = "EngineObjectStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IndexTemplateSpec {
    /// Cluster the template lives in
    pub opensearch_ref: OpensearchRef,
    /// Engine-side name; the resource name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Index patterns the template applies to
    pub index_patterns: Vec<String>,
    /// Makes matching indices data streams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_stream: Option<DataStreamSpec>,
    /// Template body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateBody>,
    /// Component templates composed in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub composed_of: Vec<String>,
    /// Priority among matching templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    /// User version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Free-form metadata
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub meta: Option<serde_json::Value>,
}

/// A component template
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opensearch.opster.io",
    version = "v1",
    kind = "OpensearchComponentTemplate",
    plural = "opensearchcomponenttemplates",
    namespaced,
    status = "EngineObjectStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentTemplateSpec {
    /// Cluster the template lives in
    pub opensearch_ref: OpensearchRef,
    /// Engine-side name; the resource name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Template body
    pub template: TemplateBody,
    /// User version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Allow index auto-creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_auto_create: Option<bool>,
    /// Free-form metadata
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub meta: Option<serde_json::Value>,
}

/// A stored search template
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "opensearch.opster.io",
    version = "v1",
    kind = "OpensearchSearchTemplate",
    plural = "opensearchsearchtemplates",
    namespaced,
    status = "EngineObjectStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SearchTemplateSpec {
    /// Cluster the template lives in
    pub opensearch_ref: OpensearchRef,
    /// Script id; the resource name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Template language
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Template source
    pub source: String,
}

fn default_lang() -> String {
    "mustache".to_string()
}
