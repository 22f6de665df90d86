//! Shared state of the in-engine object controllers

use std::sync::Arc;

use kube::runtime::events::EventType;
use kube::{Client, Resource};

use opensearch_client::OpenSearchClient;
use opensearch_common::config::OperatorConfig;
use opensearch_common::crd::OpenSearchCluster;
use opensearch_common::engine::EngineConnector;
use opensearch_common::events::{EventPublisher, KubeEventPublisher};
use opensearch_common::k8s::K8s;
use opensearch_common::reconcile::ReconcilerOptions;
use opensearch_common::store::KubeObjectStore;
use opensearch_common::Error;

/// Name reported on events published by these controllers
pub const CONTROLLER_NAME: &str = "opensearch-resource-controller";

/// Context shared by every in-engine object reconcile
pub struct Context {
    /// Typed orchestrator access
    pub k8s: K8s,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Builds engine clients for clusters
    pub engine: EngineConnector,
    /// Test knobs
    pub options: ReconcilerOptions,
}

impl Context {
    /// Production context backed by the Kubernetes API
    pub fn new(client: Client, config: Arc<OperatorConfig>) -> Self {
        let k8s = K8s::new(Arc::new(KubeObjectStore::new(client.clone())));
        let events = Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME));
        Self::from_parts(k8s, events, config, ReconcilerOptions::default())
    }

    /// Context assembled from explicit parts
    pub fn from_parts(
        k8s: K8s,
        events: Arc<dyn EventPublisher>,
        config: Arc<OperatorConfig>,
        options: ReconcilerOptions,
    ) -> Self {
        let engine = EngineConnector::new(config, options.transport.clone());
        Self {
            k8s,
            events,
            engine,
            options,
        }
    }

    /// Engine client for the cluster
    pub async fn client(&self, cluster: &OpenSearchCluster) -> Result<OpenSearchClient, Error> {
        self.engine.connect(&self.k8s, cluster).await
    }

    /// Publish an event on any resource
    pub async fn publish<K>(&self, obj: &K, type_: EventType, reason: &str, action: &str, note: String)
    where
        K: Resource<DynamicType = ()>,
    {
        self.events
            .publish(&obj.object_ref(&()), type_, reason, action, Some(note))
            .await;
    }
}
