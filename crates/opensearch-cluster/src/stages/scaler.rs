//! Node pool scaling
//!
//! Replica counts move one node per reconcile. With the smart scaler
//! enabled on a formed cluster, the outgoing node is excluded from shard
//! allocation and removed only once it holds no shards; the progress is
//! kept in a `Scaler` component entry per pool so it survives restarts of
//! the operator. Objects of pools removed from the cluster spec are deleted.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info};

use opensearch_common::crd::{components, ComponentStatus, NodePool, OpenSearchCluster};
use opensearch_common::events::{actions, reasons};
use opensearch_common::kube_utils::{cluster_labels, NODEPOOL_LABEL};
use opensearch_common::reconcile::{ReconcileResult, REQUEUE_PENDING};
use opensearch_common::store::Propagation;
use opensearch_common::Error;

use crate::builders::BOOTSTRAP_POOL;
use crate::controller::Context;
use crate::names;

async fn set_replicas(ctx: &Context, sts: &StatefulSet, replicas: i32) -> Result<(), Error> {
    let mut sts = sts.clone();
    if let Some(spec) = sts.spec.as_mut() {
        spec.replicas = Some(replicas);
    }
    ctx.k8s.update(&sts).await?;
    Ok(())
}

fn scaler_entry<'a>(cluster: &'a OpenSearchCluster, pool: &NodePool) -> Option<&'a ComponentStatus> {
    cluster
        .status
        .as_ref()
        .and_then(|s| s.component(components::SCALER, Some(&pool.component)))
}

async fn record(
    ctx: &Context,
    cluster: &OpenSearchCluster,
    pool: &NodePool,
    state: &str,
    node: &str,
) -> Result<(), Error> {
    let mut entry = ComponentStatus::new(components::SCALER, state, Some(&pool.component));
    entry.conditions = vec![node.to_string()];
    ctx.update_status(cluster, move |status| status.set_component(entry.clone()))
        .await
}

async fn forget(ctx: &Context, cluster: &OpenSearchCluster, pool: &NodePool) -> Result<(), Error> {
    let component = pool.component.clone();
    ctx.update_status(cluster, move |status| {
        status.remove_component(components::SCALER, Some(&component))
    })
    .await
}

/// Exclude, drain, then remove the highest-ordinal node of the pool
async fn smart_scale_down(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    pool: &NodePool,
    sts: &StatefulSet,
    current: i32,
) -> Result<ReconcileResult, Error> {
    let client = ctx.client(cluster).await?;
    let node = names::pod(&cluster.name_any(), &pool.component, current - 1);

    match scaler_entry(cluster, pool).map(|e| e.status.as_str()) {
        None => {
            client.exclude_node(&node).await?;
            record(ctx, cluster, pool, components::EXCLUDED, &node).await?;
            info!(pool = %pool.component, %node, "excluded node from allocation before removal");
            ctx.publish(
                cluster,
                EventType::Normal,
                reasons::SCALER,
                actions::SCALE,
                format!("Excluded {} from shard allocation", node),
            )
            .await;
        }
        Some(components::EXCLUDED) => {
            if client.node_has_no_shards(&node).await? {
                record(ctx, cluster, pool, components::DRAINED, &node).await?;
                debug!(%node, "node drained");
            } else {
                debug!(%node, "waiting for shards to move off node");
            }
        }
        Some(_) => {
            set_replicas(ctx, sts, current - 1).await?;
            client.include_node(&node).await?;
            forget(ctx, cluster, pool).await?;
            ctx.publish(
                cluster,
                EventType::Normal,
                reasons::SCALER,
                actions::SCALE,
                format!("Removed drained node {} from pool {}", node, pool.component),
            )
            .await;
        }
    }
    Ok(ReconcileResult::requeue_after(REQUEUE_PENDING))
}

async fn scale_pool(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    pool: &NodePool,
) -> Result<ReconcileResult, Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let sts_name = names::statefulset(&cluster.name_any(), &pool.component);
    let Some(sts) = ctx.k8s.get::<StatefulSet>(&namespace, &sts_name).await? else {
        return Ok(ReconcileResult::done());
    };
    let current = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let desired = pool.replicas;

    if current < desired {
        set_replicas(ctx, &sts, current + 1).await?;
        info!(pool = %pool.component, from = current, to = current + 1, "scaling pool up");
        ctx.publish(
            cluster,
            EventType::Normal,
            reasons::SCALER,
            actions::SCALE,
            format!("Scaling {} from {} to {}", sts_name, current, current + 1),
        )
        .await;
        return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
    }

    if current > desired {
        if cluster.spec.conf_mgmt.smart_scaler && cluster.is_running() {
            return smart_scale_down(cluster, ctx, pool, &sts, current).await;
        }
        set_replicas(ctx, &sts, current - 1).await?;
        info!(pool = %pool.component, from = current, to = current - 1, "scaling pool down");
        ctx.publish(
            cluster,
            EventType::Normal,
            reasons::SCALER,
            actions::SCALE,
            format!("Scaling {} from {} to {}", sts_name, current, current - 1),
        )
        .await;
        return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
    }

    // Scale-down cancelled halfway: give the node its shards back.
    if let Some(entry) = scaler_entry(cluster, pool) {
        if let Some(node) = entry.conditions.first() {
            let client = ctx.client(cluster).await?;
            client.include_node(node).await?;
            debug!(%node, "scale-down abandoned, node included again");
        }
        forget(ctx, cluster, pool).await?;
    }
    Ok(ReconcileResult::done())
}

/// Delete stateful sets, services and budgets of pools no longer in the cluster spec
async fn remove_orphaned_pools(cluster: &OpenSearchCluster, ctx: &Context) -> Result<(), Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let labels = cluster_labels(&cluster.name_any());
    let orphaned = |labels: &std::collections::BTreeMap<String, String>| -> Option<String> {
        let pool = labels.get(NODEPOOL_LABEL)?;
        let known = pool == BOOTSTRAP_POOL
            || cluster.spec.node_pools.iter().any(|p| &p.component == pool);
        (!known).then(|| pool.clone())
    };

    for sts in ctx.k8s.list::<StatefulSet>(&namespace, &labels).await? {
        if let Some(pool) = orphaned(sts.labels()) {
            ctx.k8s
                .delete::<StatefulSet>(&namespace, &sts.name_any(), Propagation::Background)
                .await?;
            info!(%pool, "deleted stateful set of removed pool");
            ctx.publish(
                cluster,
                EventType::Normal,
                reasons::SCALER,
                actions::DELETE,
                format!("Deleted node pool {}", pool),
            )
            .await;
        }
    }
    for svc in ctx.k8s.list::<Service>(&namespace, &labels).await? {
        if orphaned(svc.labels()).is_some() {
            ctx.k8s
                .delete::<Service>(&namespace, &svc.name_any(), Propagation::Background)
                .await?;
        }
    }
    for pdb in ctx.k8s.list::<PodDisruptionBudget>(&namespace, &labels).await? {
        if orphaned(pdb.labels()).is_some() {
            ctx.k8s
                .delete::<PodDisruptionBudget>(&namespace, &pdb.name_any(), Propagation::Background)
                .await?;
        }
    }
    Ok(())
}

/// Move every pool one step towards its replica count
pub async fn reconcile(cluster: &OpenSearchCluster, ctx: &Context) -> Result<ReconcileResult, Error> {
    let mut result = ReconcileResult::done();
    for pool in &cluster.spec.node_pools {
        result.merge(scale_pool(cluster, ctx, pool).await?);
    }
    remove_orphaned_pools(cluster, ctx).await?;
    Ok(result)
}
