//! Custom Resource Definitions for the OpenSearch operator

mod cluster;
mod policies;
mod security;
mod templates;
mod types;

pub use cluster::*;
pub use policies::*;
pub use security::*;
pub use templates::*;
pub use types::*;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};

/// Every CRD served by the operator
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        OpenSearchCluster::crd(),
        OpensearchUser::crd(),
        OpensearchRole::crd(),
        OpensearchUserRoleBinding::crd(),
        OpensearchTenant::crd(),
        OpensearchActionGroup::crd(),
        OpensearchIndexTemplate::crd(),
        OpensearchComponentTemplate::crd(),
        OpensearchSearchTemplate::crd(),
        OpenSearchISMPolicy::crd(),
        OpensearchSnapshotPolicy::crd(),
    ]
}

/// Schema for free-form JSON objects handed to the engine verbatim
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

/// Schema for a list of free-form JSON objects
pub(crate) fn preserve_unknown_fields_list(gen: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        ..Default::default()
    };
    schema.array().items = Some(preserve_unknown_fields(gen).into());
    Schema::Object(schema)
}
