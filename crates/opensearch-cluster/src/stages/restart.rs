//! Rolling restart after template changes
//!
//! A changed pod template (config checksum, resources, certificates) gives
//! the stateful set a new update revision. Pods are replaced one at a time
//! while the engine stays ready to lose a node. Pods stuck in
//! CrashLoopBackOff on an old revision are deleted right away, since they
//! would otherwise block the rollout forever.

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use opensearch_client::ShardAllocation;
use opensearch_common::crd::{components, ComponentStatus, NodePool, OpenSearchCluster};
use opensearch_common::events::{actions, reasons};
use opensearch_common::reconcile::{ReconcileResult, REQUEUE_PENDING};
use opensearch_common::store::Propagation;
use opensearch_common::Error;

use crate::controller::Context;
use crate::rollout::{cluster_ready, crash_looping, drain_and_delete, PoolState, Replacement};

fn restart_in_progress(cluster: &OpenSearchCluster) -> bool {
    cluster
        .status
        .as_ref()
        .and_then(|s| s.component(components::RESTARTER, None))
        .map(|c| c.status == components::IN_PROGRESS)
        .unwrap_or(false)
}

async fn set_restarter(ctx: &Context, cluster: &OpenSearchCluster, state: &'static str) -> Result<(), Error> {
    ctx.update_status(cluster, move |status| {
        status.set_component(ComponentStatus::new(components::RESTARTER, state, None))
    })
    .await
}

/// Delete pods crash looping on an outdated revision; true if one was deleted
async fn delete_stuck_pods(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    pools: &[(&NodePool, PoolState)],
) -> Result<bool, Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let mut deleted = false;
    for (_, state) in pools {
        for pod in state.stale_pods().into_iter().filter(|p| crash_looping(p)) {
            ctx.k8s
                .delete::<Pod>(&namespace, &pod.name_any(), Propagation::Background)
                .await?;
            warn!(pod = %pod.name_any(), "deleted pod stuck in CrashLoopBackOff on an old revision");
            ctx.publish(
                cluster,
                EventType::Warning,
                reasons::RESTART,
                actions::DELETE,
                format!("Deleted stuck pod {}", pod.name_any()),
            )
            .await;
            deleted = true;
        }
    }
    Ok(deleted)
}

/// Replace one outdated pod when the engine can lose it
pub async fn reconcile(cluster: &OpenSearchCluster, ctx: &Context) -> Result<ReconcileResult, Error> {
    let mut pools = Vec::with_capacity(cluster.spec.node_pools.len());
    for pool in &cluster.spec.node_pools {
        pools.push((pool, PoolState::load(cluster, ctx, pool).await?));
    }

    if delete_stuck_pods(cluster, ctx, &pools).await? {
        return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
    }
    if cluster.upgrade_in_progress() {
        debug!("upgrade in progress, the upgrader replaces pods");
        return Ok(ReconcileResult::done());
    }

    let in_progress = restart_in_progress(cluster);
    let pending: Vec<&(&NodePool, PoolState)> =
        pools.iter().filter(|(_, s)| s.has_pending_revision()).collect();
    if pending.is_empty() && !in_progress {
        return Ok(ReconcileResult::done());
    }

    if pools.iter().any(|(p, s)| p.is_data() && !s.ready()) {
        debug!("waiting for data pools to be ready");
        return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
    }

    if pending.is_empty() {
        let client = ctx.client(cluster).await?;
        client.set_shard_allocation(ShardAllocation::All).await?;
        set_restarter(ctx, cluster, components::FINISHED).await?;
        info!("rolling restart finished");
        ctx.publish(
            cluster,
            EventType::Normal,
            reasons::RESTART,
            actions::RESTART,
            "Rolling restart finished",
        )
        .await;
        return Ok(ReconcileResult::done());
    }

    if !cluster.is_initialized() {
        return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
    }

    if !in_progress {
        set_restarter(ctx, cluster, components::IN_PROGRESS).await?;
        ctx.publish(
            cluster,
            EventType::Normal,
            reasons::RESTART,
            actions::RESTART,
            "Starting rolling restart",
        )
        .await;
    }

    let client = ctx.client(cluster).await?;
    if !cluster_ready(cluster, &client).await? {
        debug!("cluster not ready to lose a node");
        return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
    }

    let (pool, state) = pending[0];
    if !state.settled() {
        debug!(pool = %pool.component, "waiting for the previous replacement to rejoin");
        return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
    }
    if let Some(pod) = state.stale_pods().first() {
        if drain_and_delete(cluster, ctx, &client, pod).await? == Replacement::Deleted {
            ctx.publish(
                cluster,
                EventType::Normal,
                reasons::RESTART,
                actions::RESTART,
                format!("Restarted {} of pool {}", pod.name_any(), pool.component),
            )
            .await;
        }
    }
    Ok(ReconcileResult::requeue_after(REQUEUE_PENDING))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::NodeSetup;
    use crate::stages::nodes;
    use crate::test_support::{cluster, green, pool, pool_pod, running, Harness, NAMESPACE};
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateWaiting, ContainerStatus};
    use opensearch_client::types::{ClusterHealth, HealthStatus};

    async fn pod_exists(h: &Harness, name: &str) -> bool {
        h.store.fetch::<Pod>(NAMESPACE, name).await.is_some()
    }

    async fn restarter(h: &Harness) -> Option<String> {
        h.status()
            .await
            .component(components::RESTARTER, None)
            .map(|c| c.status.clone())
    }

    async fn formed(h: &Harness, version: &str) -> OpenSearchCluster {
        let c = h
            .insert(&running(cluster(vec![pool("data", 2, &["data"])]), version))
            .await;
        nodes::reconcile(&c, &h.ctx, &NodeSetup::default()).await.unwrap();
        c
    }

    #[tokio::test]
    async fn stuck_pods_are_deleted_even_during_an_upgrade() {
        let h = Harness::new();
        let c = formed(&h, "2.10.0").await;
        h.set_rollout("data", 1, 1, "v2").await;
        h.add_pod("data", 0, "v2").await;
        let mut stuck = pool_pod("data", 1, "v1");
        if let Some(status) = stuck.status.as_mut() {
            status.container_statuses = Some(vec![ContainerStatus {
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting {
                        reason: Some("CrashLoopBackOff".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]);
        }
        h.store.insert(&stuck).await;
        assert!(c.upgrade_in_progress());

        let result = reconcile(&c, &h.ctx).await.unwrap();

        assert_eq!(result.requeue_after, Some(REQUEUE_PENDING));
        assert!(!pod_exists(&h, "logs-data-1").await);
        assert!(pod_exists(&h, "logs-data-0").await);
        assert!(h.events.has_reason(reasons::RESTART).await);
    }

    #[tokio::test]
    async fn pods_are_replaced_one_at_a_time() {
        let h = Harness::new();
        formed(&h, "2.11.0").await;
        h.set_rollout("data", 2, 0, "v2").await;
        h.add_pod("data", 0, "v1").await;
        h.add_pod("data", 1, "v1").await;
        h.engine.set_health(green(2)).await;

        reconcile(&h.cluster().await, &h.ctx).await.unwrap();
        assert!(!pod_exists(&h, "logs-data-0").await);
        assert!(pod_exists(&h, "logs-data-1").await);
        assert_eq!(restarter(&h).await.as_deref(), Some(components::IN_PROGRESS));
        let client = h.ctx.client(&h.cluster().await).await.unwrap();
        assert_eq!(
            client.shard_allocation().await.unwrap(),
            ShardAllocation::Primaries
        );

        // replacement pod back on the new revision, replicas recovering
        h.add_pod("data", 0, "v2").await;
        h.set_rollout("data", 2, 1, "v2").await;
        h.engine
            .set_health(ClusterHealth {
                status: HealthStatus::Yellow,
                ..green(2)
            })
            .await;
        reconcile(&h.cluster().await, &h.ctx).await.unwrap();
        assert!(!pod_exists(&h, "logs-data-1").await);

        h.add_pod("data", 1, "v2").await;
        h.set_rollout("data", 2, 2, "v2").await;
        h.engine.set_health(green(2)).await;
        let result = reconcile(&h.cluster().await, &h.ctx).await.unwrap();
        assert_eq!(result, ReconcileResult::done());
        assert_eq!(restarter(&h).await.as_deref(), Some(components::FINISHED));
        assert_eq!(client.shard_allocation().await.unwrap(), ShardAllocation::All);
    }

    #[tokio::test]
    async fn manager_pool_loses_one_pod_at_a_time() {
        let h = Harness::new();
        let c = h
            .insert(&running(
                cluster(vec![
                    pool("masters", 3, &["cluster_manager"]),
                    pool("data", 2, &["data"]),
                ]),
                "2.11.0",
            ))
            .await;
        nodes::reconcile(&c, &h.ctx, &NodeSetup::default()).await.unwrap();
        h.set_rollout("data", 2, 2, "d1").await;
        h.add_pod("data", 0, "d1").await;
        h.add_pod("data", 1, "d1").await;
        h.set_rollout("masters", 3, 0, "m2").await;
        for ordinal in 0..3 {
            h.add_pod("masters", ordinal, "m1").await;
        }
        h.engine.set_health(green(5)).await;

        reconcile(&h.cluster().await, &h.ctx).await.unwrap();
        assert!(!pod_exists(&h, "logs-masters-0").await);

        // replacement not yet recreated
        h.set_rollout("masters", 2, 0, "m2").await;
        let result = reconcile(&h.cluster().await, &h.ctx).await.unwrap();
        assert_eq!(result.requeue_after, Some(REQUEUE_PENDING));
        assert!(pod_exists(&h, "logs-masters-1").await);
        assert!(pod_exists(&h, "logs-masters-2").await);

        // stateful set status lagging behind a missing pod
        h.set_rollout("masters", 3, 0, "m2").await;
        reconcile(&h.cluster().await, &h.ctx).await.unwrap();
        assert!(pod_exists(&h, "logs-masters-1").await);

        h.add_pod("masters", 0, "m2").await;
        h.set_rollout("masters", 3, 1, "m2").await;
        reconcile(&h.cluster().await, &h.ctx).await.unwrap();
        assert!(pod_exists(&h, "logs-masters-0").await);
        assert!(!pod_exists(&h, "logs-masters-1").await);
        assert!(pod_exists(&h, "logs-masters-2").await);
    }

    #[tokio::test]
    async fn waits_for_data_pools_to_be_ready() {
        let h = Harness::new();
        let c = formed(&h, "2.11.0").await;
        h.set_rollout("data", 1, 0, "v2").await;
        h.add_pod("data", 0, "v1").await;
        h.add_pod("data", 1, "v1").await;
        h.engine.set_health(green(2)).await;

        let result = reconcile(&c, &h.ctx).await.unwrap();

        assert_eq!(result.requeue_after, Some(REQUEUE_PENDING));
        assert!(pod_exists(&h, "logs-data-0").await);
        assert!(pod_exists(&h, "logs-data-1").await);
    }

    #[tokio::test]
    async fn red_cluster_blocks_the_restart() {
        let h = Harness::new();
        let c = formed(&h, "2.11.0").await;
        h.set_rollout("data", 2, 0, "v2").await;
        h.add_pod("data", 0, "v1").await;
        h.add_pod("data", 1, "v1").await;
        h.engine
            .set_health(ClusterHealth {
                status: HealthStatus::Red,
                ..green(2)
            })
            .await;

        reconcile(&c, &h.ctx).await.unwrap();

        assert!(pod_exists(&h, "logs-data-0").await);
        assert!(pod_exists(&h, "logs-data-1").await);
    }
}
