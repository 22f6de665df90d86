//! In-memory fakes for controller tests
//!
//! [`InMemoryStore`] behaves like a small API server: it assigns uids and
//! resource versions, rejects stale writes with 409, keeps status separate
//! from the main resource and honours finalizers on delete.
//! [`RecordingEventPublisher`] keeps every published event.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{ApiResource, DynamicObject};
use kube::core::ErrorResponse;
use kube::runtime::events::EventType;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::events::EventPublisher;
use crate::k8s::Object;
use crate::store::{ObjectKey, ObjectStore, Propagation};
use crate::Error;

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::Kube {
        source: kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message,
            reason: reason.to_string(),
            code,
        }),
    }
}

fn slot(resource: &ApiResource, namespace: &str, name: &str) -> String {
    format!("{}/{}/{}/{}", resource.group, resource.plural, namespace, name)
}

fn prefix(resource: &ApiResource, namespace: &str) -> String {
    format!("{}/{}/{}/", resource.group, resource.plural, namespace)
}

/// One recorded deletion
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deletion {
    /// Plural of the deleted kind
    pub plural: String,
    /// Object name
    pub name: String,
    /// Requested propagation
    pub propagation: Propagation,
}

#[derive(Default)]
struct StoreState {
    objects: BTreeMap<String, DynamicObject>,
    version: u64,
    deletions: Vec<Deletion>,
    writes: usize,
}

impl StoreState {
    fn bump(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In-memory object store
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

fn to_dynamic<T: Serialize>(obj: &T) -> DynamicObject {
    serde_json::from_value(serde_json::to_value(obj).unwrap_or_default()).unwrap_or_else(|_| {
        DynamicObject {
            types: None,
            metadata: Default::default(),
            data: serde_json::Value::Null,
        }
    })
}

fn from_dynamic<T: DeserializeOwned>(obj: &DynamicObject) -> Option<T> {
    serde_json::to_value(obj)
        .ok()
        .and_then(|v| serde_json::from_value(v).ok())
}

impl InMemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an object, status included
    pub async fn insert<T: Object>(&self, obj: &T) {
        let mut state = self.state.lock().await;
        let mut dynamic = to_dynamic(obj);
        dynamic.metadata.resource_version = Some(state.bump());
        if dynamic.metadata.uid.is_none() {
            dynamic.metadata.uid = Some(format!("uid-{}", state.version));
        }
        let ar = ApiResource::erase::<T>(&());
        let key = slot(
            &ar,
            dynamic.metadata.namespace.as_deref().unwrap_or_default(),
            dynamic.metadata.name.as_deref().unwrap_or_default(),
        );
        state.objects.insert(key, dynamic);
    }

    /// Typed copy of a stored object
    pub async fn fetch<T: Object>(&self, namespace: &str, name: &str) -> Option<T> {
        let ar = ApiResource::erase::<T>(&());
        let state = self.state.lock().await;
        state
            .objects
            .get(&slot(&ar, namespace, name))
            .and_then(from_dynamic)
    }

    /// Mutate a stored object in place, status included
    pub async fn modify<T: Object>(&self, namespace: &str, name: &str, mutate: impl FnOnce(&mut T)) {
        if let Some(mut obj) = self.fetch::<T>(namespace, name).await {
            mutate(&mut obj);
            self.insert(&obj).await;
        }
    }

    /// Every stored object of a kind in a namespace
    pub async fn all<T: Object>(&self, namespace: &str) -> Vec<T> {
        let ar = ApiResource::erase::<T>(&());
        let p = prefix(&ar, namespace);
        let state = self.state.lock().await;
        state
            .objects
            .iter()
            .filter(|(k, _)| k.starts_with(&p))
            .filter_map(|(_, v)| from_dynamic(v))
            .collect()
    }

    /// Deletions performed through the store
    pub async fn deletions(&self) -> Vec<Deletion> {
        self.state.lock().await.deletions.clone()
    }

    /// Number of create, replace and status writes
    pub async fn write_count(&self) -> usize {
        self.state.lock().await.writes
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .objects
            .get(&slot(
                &key.resource,
                key.namespace.as_deref().unwrap_or_default(),
                &key.name,
            ))
            .cloned())
    }

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let mut state = self.state.lock().await;
        let name = obj.metadata.name.clone().unwrap_or_default();
        let key = slot(
            resource,
            obj.metadata.namespace.as_deref().unwrap_or_default(),
            &name,
        );
        if state.objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} {} already exists", resource.kind, name),
            ));
        }
        let mut created = obj.clone();
        created.metadata.resource_version = Some(state.bump());
        created.metadata.uid = Some(format!("uid-{}", state.version));
        created.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        if let Some(data) = created.data.as_object_mut() {
            data.remove("status");
        }
        state.writes += 1;
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn replace(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, Error> {
        let mut state = self.state.lock().await;
        let name = obj.metadata.name.clone().unwrap_or_default();
        let key = slot(
            resource,
            obj.metadata.namespace.as_deref().unwrap_or_default(),
            &name,
        );
        let Some(current) = state.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} {} not found", resource.kind, name)));
        };
        if obj.metadata.resource_version.is_some()
            && obj.metadata.resource_version != current.metadata.resource_version
        {
            return Err(api_error(
                409,
                "Conflict",
                format!("the object {} has been modified", name),
            ));
        }

        let mut replaced = obj.clone();
        replaced.metadata.uid = current.metadata.uid.clone();
        replaced.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        replaced.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        if let Some(data) = replaced.data.as_object_mut() {
            match current.data.get("status") {
                Some(status) => {
                    data.insert("status".to_string(), status.clone());
                }
                None => {
                    data.remove("status");
                }
            }
        }
        state.writes += 1;

        let finalizers_gone = replaced
            .metadata
            .finalizers
            .as_ref()
            .map(|f| f.is_empty())
            .unwrap_or(true);
        if replaced.metadata.deletion_timestamp.is_some() && finalizers_gone {
            state.objects.remove(&key);
            return Ok(replaced);
        }

        replaced.metadata.resource_version = Some(state.bump());
        state.objects.insert(key, replaced.clone());
        Ok(replaced)
    }

    async fn replace_status(
        &self,
        resource: &ApiResource,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let mut state = self.state.lock().await;
        let name = obj.metadata.name.clone().unwrap_or_default();
        let key = slot(
            resource,
            obj.metadata.namespace.as_deref().unwrap_or_default(),
            &name,
        );
        let Some(mut current) = state.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} {} not found", resource.kind, name)));
        };
        if obj.metadata.resource_version.is_some()
            && obj.metadata.resource_version != current.metadata.resource_version
        {
            return Err(Error::StatusConflict {
                resource: name,
                message: "the object has been modified".to_string(),
            });
        }
        if let (Some(data), Some(status)) = (current.data.as_object_mut(), obj.data.get("status")) {
            data.insert("status".to_string(), status.clone());
        }
        current.metadata.resource_version = Some(state.bump());
        state.writes += 1;
        state.objects.insert(key, current.clone());
        Ok(current)
    }

    async fn delete(&self, key: &ObjectKey, propagation: Propagation) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        let slot_key = slot(
            &key.resource,
            key.namespace.as_deref().unwrap_or_default(),
            &key.name,
        );
        let Some(current) = state.objects.get(&slot_key).cloned() else {
            return Ok(false);
        };
        state.deletions.push(Deletion {
            plural: key.resource.plural.clone(),
            name: key.name.clone(),
            propagation,
        });

        let has_finalizers = current
            .metadata
            .finalizers
            .as_ref()
            .map(|f| !f.is_empty())
            .unwrap_or(false);
        if has_finalizers {
            let mut marked = current;
            marked.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            marked.metadata.resource_version = Some(state.bump());
            state.objects.insert(slot_key, marked);
        } else {
            state.objects.remove(&slot_key);
        }
        Ok(true)
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, Error> {
        let state = self.state.lock().await;
        let p = prefix(resource, namespace);
        Ok(state
            .objects
            .iter()
            .filter(|(k, _)| k.starts_with(&p))
            .map(|(_, v)| v)
            .filter(|obj| {
                let own = obj.metadata.labels.clone().unwrap_or_default();
                labels.iter().all(|(k, v)| own.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }
}

/// One published event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Name of the object the event is about
    pub object: String,
    /// Warning rather than Normal
    pub warning: bool,
    /// Reason token
    pub reason: String,
    /// Action token
    pub action: String,
    /// Message
    pub note: Option<String>,
}

/// Event publisher that keeps every event
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Events in publish order
    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().await.clone()
    }

    /// Whether any event carries the reason
    pub async fn has_reason(&self, reason: &str) -> bool {
        self.events.lock().await.iter().any(|e| e.reason == reason)
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events.lock().await.push(RecordedEvent {
            object: resource_ref.name.clone().unwrap_or_default(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}
