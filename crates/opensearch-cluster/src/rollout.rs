//! Pod replacement shared by the rolling restart and the upgrade
//!
//! Stateful sets use the OnDelete strategy: a new template only reaches a
//! pod when the operator deletes it. Both workflows pick one pod whose
//! revision lags the set's update revision, make the engine ready to lose
//! it and delete it; the stateful set controller recreates it.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

use opensearch_client::types::HealthStatus;
use opensearch_client::{OpenSearchClient, ShardAllocation};
use opensearch_common::crd::{NodePool, OpenSearchCluster};
use opensearch_common::kube_utils::pool_labels;
use opensearch_common::store::Propagation;
use opensearch_common::Error;

use crate::controller::Context;
use crate::names;

/// Live stateful set and pods of one pool
pub struct PoolState {
    /// Stateful set, None before the nodes stage created it
    pub statefulset: Option<StatefulSet>,
    /// Pods sorted by name
    pub pods: Vec<Pod>,
}

impl PoolState {
    /// Fetch the stateful set and pods of a pool
    pub async fn load(cluster: &OpenSearchCluster, ctx: &Context, pool: &NodePool) -> Result<Self, Error> {
        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_default();
        let statefulset = ctx
            .k8s
            .get::<StatefulSet>(&namespace, &names::statefulset(&name, &pool.component))
            .await?;
        let mut pods = ctx
            .k8s
            .list::<Pod>(&namespace, &pool_labels(&name, &pool.component))
            .await?;
        pods.sort_by_key(|p| p.name_any());
        Ok(Self { statefulset, pods })
    }

    /// Revision the stateful set wants every pod at
    pub fn update_revision(&self) -> Option<&str> {
        self.statefulset
            .as_ref()?
            .status
            .as_ref()?
            .update_revision
            .as_deref()
    }

    /// Pods running an older revision
    pub fn stale_pods(&self) -> Vec<&Pod> {
        let Some(target) = self.update_revision() else {
            return Vec::new();
        };
        self.pods
            .iter()
            .filter(|p| pod_revision(p).map(|r| r != target).unwrap_or(false))
            .collect()
    }

    /// Whether any pod lags the update revision
    pub fn has_pending_revision(&self) -> bool {
        !self.stale_pods().is_empty()
    }

    /// Whether every desired replica is ready
    pub fn ready(&self) -> bool {
        let Some(sts) = &self.statefulset else {
            return false;
        };
        let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        let ready = sts
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        ready >= desired
    }

    /// Whether the pool can spare a pod
    ///
    /// Every desired replica exists and is Ready, and none is terminating.
    /// A replacement still being recreated keeps the pool unsettled even
    /// when the stateful set status has not caught up yet.
    pub fn settled(&self) -> bool {
        let desired = self
            .statefulset
            .as_ref()
            .and_then(|sts| sts.spec.as_ref())
            .and_then(|s| s.replicas)
            .unwrap_or(0);
        self.ready()
            && self.pods.len() >= usize::try_from(desired).unwrap_or(0)
            && self
                .pods
                .iter()
                .all(|p| pod_ready(p) && p.metadata.deletion_timestamp.is_none())
    }

    /// Whether every replica runs the update revision
    pub fn fully_updated(&self) -> bool {
        let Some(sts) = &self.statefulset else {
            return false;
        };
        let Some(status) = &sts.status else {
            return false;
        };
        let generation_seen = status.observed_generation == sts.metadata.generation;
        let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        generation_seen && status.updated_replicas.unwrap_or(0) == desired
    }
}

/// Revision label of a pod
pub fn pod_revision(pod: &Pod) -> Option<&str> {
    pod.labels().get(names::REVISION_LABEL).map(String::as_str)
}

/// Whether a pod reports the Ready condition
pub fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Whether a container of the pod is waiting in CrashLoopBackOff
pub fn crash_looping(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses.iter().any(|c| {
                c.state
                    .as_ref()
                    .and_then(|s| s.waiting.as_ref())
                    .and_then(|w| w.reason.as_deref())
                    == Some("CrashLoopBackOff")
            })
        })
        .unwrap_or(false)
}

/// Whether the engine can lose a node without losing data availability
///
/// Green is always ready. Otherwise the cluster counts as ready only while
/// a replacement is in flight: allocation limited to primaries, health
/// yellow and no shard initializing or relocating. Draining clusters wait
/// for green.
pub async fn cluster_ready(cluster: &OpenSearchCluster, client: &OpenSearchClient) -> Result<bool, Error> {
    let health = client.cluster_health().await?;
    if health.status == HealthStatus::Green {
        return Ok(true);
    }
    if cluster.spec.general.drain_data_nodes || health.status == HealthStatus::Red {
        return Ok(false);
    }
    let allocation = client.shard_allocation().await?;
    Ok(allocation == ShardAllocation::Primaries
        && health.initializing_shards == 0
        && health.relocating_shards == 0)
}

/// Outcome of [`drain_and_delete`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Replacement {
    /// The pod was deleted
    Deleted,
    /// Shards are still moving off the pod
    Draining,
}

/// Prepare the engine for losing a pod, then delete it
///
/// When draining is requested and more than two data nodes exist, the node
/// is excluded from allocation first and deleted only once empty.
/// Allocation is limited to primaries and indices are flushed before the
/// delete.
pub async fn drain_and_delete(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    client: &OpenSearchClient,
    pod: &Pod,
) -> Result<Replacement, Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let node = pod.name_any();

    let drain = cluster.spec.general.drain_data_nodes
        && client.cluster_health().await?.number_of_data_nodes > 2;
    if drain {
        client.exclude_node(&node).await?;
        if !client.node_has_no_shards(&node).await? {
            debug!(node = %node, "waiting for shards to move off node");
            return Ok(Replacement::Draining);
        }
    }

    client.set_shard_allocation(ShardAllocation::Primaries).await?;
    client.flush().await?;
    ctx.k8s
        .delete::<Pod>(&namespace, &node, Propagation::Background)
        .await?;
    info!(pod = %node, "deleted pod for replacement");

    if drain {
        client.include_node(&node).await?;
    }
    Ok(Replacement::Deleted)
}
