//! Typed facade over the object store
//!
//! [`K8s`] converts concrete resource types to and from the store's dynamic
//! objects and provides the polymorphic [`K8s::reconcile`] entrypoint used
//! by every cluster sub-reconciler, the conflict-retrying status write and
//! the two bounded waits a reconcile may perform.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{ApiResource, DynamicObject};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::retry::{poll_until, retry_with_backoff, RetryConfig};
use crate::store::{ObjectKey, ObjectStore, Propagation};
use crate::Error;

/// Poll interval of the bounded waits
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Upper bound of the bounded waits
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resource types the facade can handle
pub trait Object:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Object for T where
    T: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Target state of [`K8s::reconcile`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DesiredState {
    /// Create when absent, update when drifted
    Present,
    /// Create when absent, never update (immutable objects such as Pods)
    Created,
    /// Delete when present
    Absent,
}

/// What [`K8s::reconcile`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// Object was created
    Created,
    /// Object was replaced
    Updated,
    /// Object already matched
    Unchanged,
    /// Object was deleted
    Deleted,
    /// Object was already absent
    Absent,
}

impl Applied {
    /// Whether the store was written to
    pub fn changed(self) -> bool {
        matches!(self, Applied::Created | Applied::Updated | Applied::Deleted)
    }
}

/// Typed access to the orchestrator
#[derive(Clone)]
pub struct K8s {
    store: Arc<dyn ObjectStore>,
}

fn to_dynamic<T: Serialize>(obj: &T) -> Result<DynamicObject, Error> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn from_dynamic<T: DeserializeOwned>(obj: DynamicObject) -> Result<T, Error> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn key_of<T: Object>(namespace: &str, name: &str) -> ObjectKey {
    ObjectKey::namespaced(ApiResource::erase::<T>(&()), namespace, name)
}

fn identity<T: Object>(obj: &T) -> Result<(String, String), Error> {
    let name = obj.meta().name.clone().ok_or_else(|| {
        Error::internal_with_context("k8s", format!("{} has no name", T::kind(&())))
    })?;
    let namespace = obj.namespace().ok_or_else(|| {
        Error::internal_with_context("k8s", format!("{} {} has no namespace", T::kind(&()), name))
    })?;
    Ok((namespace, name))
}

impl K8s {
    /// Wrap an object store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Fetch an object; None when absent
    pub async fn get<T: Object>(&self, namespace: &str, name: &str) -> Result<Option<T>, Error> {
        match self.store.get(&key_of::<T>(namespace, name)).await? {
            Some(obj) => Ok(Some(from_dynamic(obj)?)),
            None => Ok(None),
        }
    }

    /// List objects in a namespace matching every label
    pub async fn list<T: Object>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<T>, Error> {
        self.store
            .list(&ApiResource::erase::<T>(&()), namespace, labels)
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    /// Create an object
    pub async fn create<T: Object>(&self, obj: &T) -> Result<T, Error> {
        let created = self
            .store
            .create(&ApiResource::erase::<T>(&()), &to_dynamic(obj)?)
            .await?;
        from_dynamic(created)
    }

    /// Replace an object; its resourceVersion must be current
    pub async fn update<T: Object>(&self, obj: &T) -> Result<T, Error> {
        let updated = self
            .store
            .replace(&ApiResource::erase::<T>(&()), &to_dynamic(obj)?)
            .await?;
        from_dynamic(updated)
    }

    /// Delete an object; false when it was already gone
    pub async fn delete<T: Object>(
        &self,
        namespace: &str,
        name: &str,
        propagation: Propagation,
    ) -> Result<bool, Error> {
        self.store
            .delete(&key_of::<T>(namespace, name), propagation)
            .await
    }

    /// Drive one object towards the desired state
    pub async fn reconcile<T: Object>(&self, obj: &T, state: DesiredState) -> Result<Applied, Error> {
        let (namespace, name) = identity(obj)?;
        let key = key_of::<T>(&namespace, &name);
        let existing = self.store.get(&key).await?;

        let applied = match (state, existing) {
            (DesiredState::Absent, None) => Applied::Absent,
            (DesiredState::Absent, Some(_)) => {
                if self.store.delete(&key, Propagation::Background).await? {
                    Applied::Deleted
                } else {
                    Applied::Absent
                }
            }
            (_, None) => {
                self.store.create(&key.resource, &to_dynamic(obj)?).await?;
                Applied::Created
            }
            (DesiredState::Created, Some(_)) => Applied::Unchanged,
            (DesiredState::Present, Some(existing)) => {
                let desired = serde_json::to_value(obj)?;
                let mut current = serde_json::to_value(&existing)?;
                if contains(&current, &desired) {
                    Applied::Unchanged
                } else {
                    merge(&mut current, desired);
                    let mut replacement: DynamicObject = serde_json::from_value(current)?;
                    replacement.metadata.resource_version = existing.metadata.resource_version;
                    self.store.replace(&key.resource, &replacement).await?;
                    Applied::Updated
                }
            }
        };

        if applied.changed() {
            debug!(object = %key, ?applied, "Reconciled object");
        }
        Ok(applied)
    }

    /// Mutate the status of an object, retrying on conflict
    ///
    /// The mutator runs against a fresh copy on every attempt. Returns None
    /// when the object no longer exists; skips the write when the mutator
    /// leaves the status unchanged.
    pub async fn update_status<T, F>(
        &self,
        namespace: &str,
        name: &str,
        mutate: F,
    ) -> Result<Option<T>, Error>
    where
        T: Object,
        F: Fn(&mut T) + Send + Sync,
    {
        let key = key_of::<T>(namespace, name);
        retry_with_backoff(
            &RetryConfig::on_conflict(),
            "update_status",
            |e: &Error| e.is_conflict(),
            || self.try_update_status(&key, &mutate),
        )
        .await
    }

    async fn try_update_status<T, F>(&self, key: &ObjectKey, mutate: &F) -> Result<Option<T>, Error>
    where
        T: Object,
        F: Fn(&mut T) + Send + Sync,
    {
        let Some(current) = self.store.get(key).await? else {
            return Ok(None);
        };
        let resource_version = current.metadata.resource_version.clone();
        let current_status = current.data.get("status").cloned();

        let mut typed: T = from_dynamic(current)?;
        mutate(&mut typed);

        let mut updated = to_dynamic(&typed)?;
        if updated.data.get("status").cloned() == current_status {
            return Ok(Some(typed));
        }
        updated.metadata.resource_version = resource_version;
        let written = self.store.replace_status(&key.resource, &updated).await?;
        Ok(Some(from_dynamic(written)?))
    }

    /// Wait until a stateful set is gone
    pub async fn wait_for_statefulset_delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        poll_until(
            WAIT_TIMEOUT,
            WAIT_POLL_INTERVAL,
            format!("statefulset {}/{} was not deleted in time", namespace, name),
            || async move {
                Ok(self
                    .get::<StatefulSet>(namespace, name)
                    .await?
                    .is_none())
            },
        )
        .await
    }

    /// Wait until a stateful set reports the given number of pods
    pub async fn wait_for_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error> {
        poll_until(
            WAIT_TIMEOUT,
            WAIT_POLL_INTERVAL,
            format!(
                "statefulset {}/{} did not reach {} replicas in time",
                namespace, name, replicas
            ),
            || async move {
                let sts = self.get::<StatefulSet>(namespace, name).await?;
                Ok(sts
                    .and_then(|s| s.status)
                    .map(|s| s.replicas == replicas)
                    .unwrap_or(false))
            },
        )
        .await
    }
}

/// Whether `current` already carries every field of `desired`
///
/// Objects match when each desired key matches; arrays match element-wise
/// with equal length; numbers compare by value. Null in `desired` matches
/// anything, so server-populated fields never count as drift.
pub fn contains(current: &Value, desired: &Value) -> bool {
    match (current, desired) {
        (_, Value::Null) => true,
        (Value::Object(c), Value::Object(d)) => d
            .iter()
            .all(|(k, dv)| c.get(k).map(|cv| contains(cv, dv)).unwrap_or(dv_is_empty(dv))),
        (Value::Array(c), Value::Array(d)) => {
            c.len() == d.len() && c.iter().zip(d).all(|(cv, dv)| contains(cv, dv))
        }
        (Value::Number(c), Value::Number(d)) => c.as_f64() == d.as_f64(),
        (c, d) => c == d,
    }
}

fn dv_is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(o) => o.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn element_name(v: &Value) -> Option<&Value> {
    v.as_object().and_then(|o| o.get("name"))
}

/// Overlay `desired` onto `current`, keeping server-populated fields
///
/// Objects merge key by key. Arrays of equal length merge element-wise when
/// elements line up by `name`; otherwise the desired array wins.
pub fn merge(current: &mut Value, desired: Value) {
    match (current, desired) {
        (Value::Object(c), Value::Object(d)) => {
            for (k, dv) in d {
                match c.get_mut(&k) {
                    Some(cv) => merge(cv, dv),
                    None => {
                        c.insert(k, dv);
                    }
                }
            }
        }
        (Value::Array(c), Value::Array(d))
            if c.len() == d.len()
                && c.iter().zip(&d).all(|(cv, dv)| {
                    cv.is_object() && dv.is_object() && element_name(cv) == element_name(dv)
                }) =>
        {
            for (cv, dv) in c.iter_mut().zip(d) {
                merge(cv, dv);
            }
        }
        (c, d) => *c = d,
    }
}
