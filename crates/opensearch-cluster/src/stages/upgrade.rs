//! Version upgrades
//!
//! An upgrade starts when the requested version differs from the version in
//! status. Pools move one at a time: data-only pools first, then data pools
//! that are also cluster-manager eligible, then the rest. A pool marked
//! `Upgrading` gets the new image from the nodes stage and its pods are
//! replaced one per reconcile; the status version moves once every pool is
//! `Upgraded`.

use kube::runtime::events::EventType;
use kube::ResourceExt;
use semver::Version;
use tracing::{debug, info, warn};

use opensearch_client::ShardAllocation;
use opensearch_common::crd::{components, ComponentStatus, NodePool, OpenSearchCluster};
use opensearch_common::events::{actions, reasons};
use opensearch_common::reconcile::{ReconcileResult, REQUEUE_PENDING, REQUEUE_UPGRADE};
use opensearch_common::Error;

use crate::controller::Context;
use crate::rollout::{cluster_ready, drain_and_delete, PoolState, Replacement};

/// Check that `target` is reachable from `current`
///
/// Downgrades are refused, as are jumps of more than one major version.
pub fn check_version(current: &str, target: &str) -> Result<(), String> {
    let parse = |v: &str| Version::parse(v).map_err(|e| format!("{}: {}", v, e));
    let from = parse(current)?;
    let to = parse(target)?;
    if to < from {
        return Err(format!("downgrade from {} to {} is not supported", from, to));
    }
    if to.major > from.major + 1 {
        return Err(format!(
            "upgrade from {} to {} skips a major version",
            from, to
        ));
    }
    Ok(())
}

fn upgrade_state<'a>(cluster: &'a OpenSearchCluster, pool: &NodePool) -> Option<&'a str> {
    cluster
        .status
        .as_ref()
        .and_then(|s| s.component(components::UPGRADER, Some(&pool.component)))
        .map(|c| c.status.as_str())
}

/// Pools in upgrade order; a pool already upgrading leads its group
fn upgrade_order(cluster: &OpenSearchCluster) -> Vec<&NodePool> {
    let mut pools: Vec<&NodePool> = cluster.spec.node_pools.iter().collect();
    pools.sort_by_key(|p| {
        let group = match (p.is_data(), p.is_manager()) {
            (true, false) => 0,
            (true, true) => 1,
            _ => 2,
        };
        let started = upgrade_state(cluster, p) == Some(components::UPGRADING);
        (group, !started)
    });
    pools
}

async fn set_upgrader(
    ctx: &Context,
    cluster: &OpenSearchCluster,
    pool: &NodePool,
    state: &'static str,
) -> Result<(), Error> {
    let component = pool.component.clone();
    ctx.update_status(cluster, move |status| {
        status.set_component(ComponentStatus::new(
            components::UPGRADER,
            state,
            Some(&component),
        ))
    })
    .await
}

/// Move one pool one step through the upgrade
async fn upgrade_pool(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    pool: &NodePool,
) -> Result<ReconcileResult, Error> {
    let target = &cluster.spec.general.version;
    if upgrade_state(cluster, pool) != Some(components::UPGRADING) {
        set_upgrader(ctx, cluster, pool, components::UPGRADING).await?;
        info!(pool = %pool.component, %target, "upgrading pool");
        ctx.publish(
            cluster,
            EventType::Normal,
            reasons::UPGRADE,
            actions::UPGRADE,
            format!("Upgrading pool {} to {}", pool.component, target),
        )
        .await;
        return Ok(ReconcileResult::requeue_after(REQUEUE_UPGRADE));
    }

    let state = PoolState::load(cluster, ctx, pool).await?;
    if !state.settled() {
        debug!(pool = %pool.component, "waiting for pool to be ready");
        return Ok(ReconcileResult::requeue_after(REQUEUE_UPGRADE));
    }
    let client = ctx.client(cluster).await?;
    if !cluster_ready(cluster, &client).await? {
        debug!("cluster not ready to lose a node");
        return Ok(ReconcileResult::requeue_after(REQUEUE_UPGRADE));
    }

    if state.fully_updated() && !state.has_pending_revision() {
        client.set_shard_allocation(ShardAllocation::All).await?;
        set_upgrader(ctx, cluster, pool, components::UPGRADED).await?;
        info!(pool = %pool.component, %target, "pool upgraded");
        return Ok(ReconcileResult::requeue_after(REQUEUE_UPGRADE));
    }

    if let Some(pod) = state.stale_pods().first() {
        if drain_and_delete(cluster, ctx, &client, pod).await? == Replacement::Deleted {
            debug!(pod = %pod.name_any(), "replaced pod with upgraded image");
        }
    }
    Ok(ReconcileResult::requeue_after(REQUEUE_UPGRADE))
}

/// Drive an upgrade one step forward
pub async fn reconcile(cluster: &OpenSearchCluster, ctx: &Context) -> Result<ReconcileResult, Error> {
    if !cluster.upgrade_in_progress() {
        return Ok(ReconcileResult::done());
    }
    let Some(current) = cluster.status_version() else {
        return Ok(ReconcileResult::done());
    };
    let target = cluster.spec.general.version.clone();

    if let Err(reason) = check_version(current, &target) {
        warn!(%current, %target, %reason, "refusing version change");
        ctx.publish(
            cluster,
            EventType::Warning,
            reasons::UPGRADE,
            actions::UPGRADE,
            format!("Invalid version: {}", reason),
        )
        .await;
        return Err(Error::validation_for_field(
            cluster.name_any(),
            "spec.general.version",
            reason,
        ));
    }

    if !cluster.is_running() {
        return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
    }

    let queued: Vec<String> = cluster
        .spec
        .node_pools
        .iter()
        .filter(|p| upgrade_state(cluster, p).is_none())
        .map(|p| p.component.clone())
        .collect();
    if !queued.is_empty() {
        ctx.update_status(cluster, move |status| {
            for component in &queued {
                status.set_component(ComponentStatus::new(
                    components::UPGRADER,
                    components::PENDING,
                    Some(component.as_str()),
                ));
            }
        })
        .await?;
    }

    for pool in upgrade_order(cluster) {
        if upgrade_state(cluster, pool) == Some(components::UPGRADED) {
            continue;
        }
        return upgrade_pool(cluster, ctx, pool).await;
    }

    let version = target.clone();
    ctx.update_status(cluster, move |status| {
        status.version = Some(version.clone());
        status.remove_all(components::UPGRADER);
    })
    .await?;
    info!(%target, "upgrade finished");
    ctx.publish(
        cluster,
        EventType::Normal,
        reasons::UPGRADE,
        actions::UPGRADE,
        format!("Upgraded cluster to {}", target),
    )
    .await;
    Ok(ReconcileResult::done())
}
