//! Untyped access to the orchestrator's object store
//!
//! Every read and write the reconcilers perform goes through [`ObjectStore`],
//! keyed by an erased [`ApiResource`]. The typed facade in [`crate::k8s`]
//! converts to and from concrete resource types, so this trait stays
//! object-safe and mockable.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
    PropagationPolicy,
};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Identity of one object in the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectKey {
    /// Group/version/kind/plural of the object
    pub resource: ApiResource,
    /// Namespace; None for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key of a namespaced object
    pub fn namespaced(resource: ApiResource, namespace: &str, name: &str) -> Self {
        Self {
            resource,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.resource.plural, ns, self.name),
            None => write!(f, "{}/{}", self.resource.plural, self.name),
        }
    }
}

/// What happens to dependents when an owner is deleted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Propagation {
    /// Garbage-collect dependents in the background
    #[default]
    Background,
    /// Delete dependents before the owner disappears
    Foreground,
    /// Leave dependents in place
    Orphan,
}

impl From<Propagation> for PropagationPolicy {
    fn from(p: Propagation) -> Self {
        match p {
            Propagation::Background => PropagationPolicy::Background,
            Propagation::Foreground => PropagationPolicy::Foreground,
            Propagation::Orphan => PropagationPolicy::Orphan,
        }
    }
}

/// Object CRUD against the orchestrator
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; None when absent
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error>;

    /// Create an object
    async fn create(
        &self,
        resource: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Replace an object; the carried resourceVersion guards against lost updates
    async fn replace(
        &self,
        resource: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Replace only the status subresource, guarded by resourceVersion
    async fn replace_status(
        &self,
        resource: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Delete an object; false when it was already gone
    async fn delete(&self, key: &ObjectKey, propagation: Propagation) -> Result<bool, Error>;

    /// List objects in a namespace matching every label
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, Error>;
}

/// Production store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

fn object_name(obj: &DynamicObject) -> Result<&str, Error> {
    obj.metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::internal_with_context("object_store", "object has no name"))
}

fn conflict_or(err: kube::Error, resource: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => Error::StatusConflict {
            resource: resource.to_string(),
            message: ae.message,
        },
        other => other.into(),
    }
}

/// Render a label map as a selector string
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error> {
        Ok(self
            .api(&key.resource, key.namespace.as_deref())
            .get_opt(&key.name)
            .await?)
    }

    async fn create(
        &self,
        resource: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        Ok(self
            .api(resource, obj.metadata.namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object_name(obj)?;
        self.api(resource, obj.metadata.namespace.as_deref())
            .replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| conflict_or(e, name))
    }

    async fn replace_status(
        &self,
        resource: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object_name(obj)?;
        // A merge patch carrying resourceVersion is rejected with 409 when stale
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.metadata.resource_version },
            "status": obj.data.get("status").cloned().unwrap_or(serde_json::Value::Null),
        });
        self.api(resource, obj.metadata.namespace.as_deref())
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| conflict_or(e, name))
    }

    async fn delete(&self, key: &ObjectKey, propagation: Propagation) -> Result<bool, Error> {
        let params = DeleteParams {
            propagation_policy: Some(propagation.into()),
            ..Default::default()
        };
        match self
            .api(&key.resource, key.namespace.as_deref())
            .delete(&key.name, &params)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, Error> {
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(self
            .api(resource, Some(namespace))
            .list(&params)
            .await?
            .items)
    }
}
