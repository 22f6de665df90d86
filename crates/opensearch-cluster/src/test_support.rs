//! Fixtures shared by the controller tests

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;

use opensearch_client::fake::FakeEngine;
use opensearch_client::types::{ClusterHealth, HealthStatus};
use opensearch_common::config::OperatorConfig;
use opensearch_common::crd::{
    ClusterPhase, ClusterSpec, ClusterStatus, ConfMgmt, GeneralConfig, NodePool, OpenSearchCluster,
};
use opensearch_common::k8s::K8s;
use opensearch_common::kube_utils::pool_labels;
use opensearch_common::reconcile::ReconcilerOptions;
use opensearch_common::testing::{InMemoryStore, RecordingEventPublisher};
use opensearch_common::Error;

use crate::controller::{reconcile, Context};
use crate::names;

pub const NAMESPACE: &str = "search";
pub const NAME: &str = "logs";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub engine: Arc<FakeEngine>,
    pub events: Arc<RecordingEventPublisher>,
    pub ctx: Arc<Context>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let engine = Arc::new(FakeEngine::new());
        let events = Arc::new(RecordingEventPublisher::new());
        let ctx = Context::from_parts(
            K8s::new(store.clone()),
            events.clone(),
            Arc::new(OperatorConfig::default()),
            ReconcilerOptions::default().with_transport(engine.clone()),
        );
        Self {
            store,
            engine,
            events,
            ctx: Arc::new(ctx),
        }
    }

    /// Store the cluster and return it as the API server would
    pub async fn insert(&self, cluster: &OpenSearchCluster) -> OpenSearchCluster {
        self.store.insert(cluster).await;
        self.cluster().await
    }

    pub async fn cluster(&self) -> OpenSearchCluster {
        self.store
            .fetch::<OpenSearchCluster>(NAMESPACE, NAME)
            .await
            .expect("cluster should be stored")
    }

    pub async fn status(&self) -> ClusterStatus {
        self.cluster().await.status.unwrap_or_default()
    }

    pub async fn reconcile(&self) -> Result<Action, Error> {
        reconcile(Arc::new(self.cluster().await), self.ctx.clone()).await
    }

    /// Report the status the stateful set controller would for a pool
    pub async fn set_rollout(&self, pool: &str, ready: i32, updated: i32, revision: &str) {
        self.store
            .modify::<StatefulSet>(NAMESPACE, &names::statefulset(NAME, pool), |sts| {
                let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
                sts.status = Some(StatefulSetStatus {
                    replicas,
                    ready_replicas: Some(ready),
                    updated_replicas: Some(updated),
                    observed_generation: sts.metadata.generation,
                    update_revision: Some(revision.to_string()),
                    ..Default::default()
                });
            })
            .await;
    }

    /// Store a ready pod of a pool at a controller revision
    pub async fn add_pod(&self, pool: &str, ordinal: i32, revision: &str) -> Pod {
        let pod = pool_pod(pool, ordinal, revision);
        self.store.insert(&pod).await;
        pod
    }
}

/// Ready pod of a pool at a controller revision
pub fn pool_pod(pool: &str, ordinal: i32, revision: &str) -> Pod {
    let mut labels = pool_labels(NAME, pool);
    labels.insert(names::REVISION_LABEL.to_string(), revision.to_string());
    Pod {
        metadata: ObjectMeta {
            name: Some(names::pod(NAME, pool, ordinal)),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pool(component: &str, replicas: i32, roles: &[&str]) -> NodePool {
    NodePool {
        component: component.to_string(),
        replicas,
        disk_size: Some("10Gi".to_string()),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        ..Default::default()
    }
}

pub fn cluster(pools: Vec<NodePool>) -> OpenSearchCluster {
    let mut cluster = OpenSearchCluster::new(
        NAME,
        ClusterSpec {
            general: GeneralConfig {
                service_name: NAME.to_string(),
                version: "2.11.0".to_string(),
                http_port: 9200,
                ..Default::default()
            },
            conf_mgmt: ConfMgmt::default(),
            node_pools: pools,
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.uid = Some("cluster-uid".to_string());
    cluster
}

/// Mark the cluster as formed and running the given version
pub fn running(mut cluster: OpenSearchCluster, version: &str) -> OpenSearchCluster {
    cluster.status = Some(ClusterStatus {
        phase: ClusterPhase::Running,
        initialized: true,
        version: Some(version.to_string()),
        ..Default::default()
    });
    cluster
}

pub fn green(nodes: i64) -> ClusterHealth {
    ClusterHealth {
        cluster_name: NAME.to_string(),
        status: HealthStatus::Green,
        number_of_nodes: nodes,
        number_of_data_nodes: nodes,
        active_shards: 10,
        ..Default::default()
    }
}
