//! Cluster status from engine health
//!
//! The cluster counts as initialized the first time it reports green with
//! a quorum of its data nodes; from then on the bootstrap pod is removed
//! and the phase stays Running.

use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use opensearch_client::types::{ClusterHealth, HealthStatus};
use opensearch_common::crd::{ClusterPhase, OpenSearchCluster};
use opensearch_common::events::{actions, reasons};
use opensearch_common::metrics;
use opensearch_common::reconcile::{ReconcileResult, REQUEUE_PENDING};
use opensearch_common::Error;

use crate::controller::Context;

/// Data nodes that must report in before the cluster counts as formed
pub fn data_quorum(cluster: &OpenSearchCluster) -> i64 {
    let replicas: i64 = cluster
        .spec
        .node_pools
        .iter()
        .filter(|p| p.is_data())
        .map(|p| i64::from(p.replicas))
        .sum();
    replicas / 2 + 1
}

fn formed(cluster: &OpenSearchCluster, health: &ClusterHealth) -> bool {
    health.status == HealthStatus::Green && health.number_of_data_nodes >= data_quorum(cluster)
}

/// Record health, detect first formation and write status
pub async fn reconcile(cluster: &OpenSearchCluster, ctx: &Context) -> Result<ReconcileResult, Error> {
    let name = cluster.name_any();
    let client = ctx.client(cluster).await?;
    let health = match client.cluster_health().await {
        Ok(health) => health,
        Err(e) if !cluster.is_initialized() => {
            debug!(error = %e, "engine not reachable yet");
            return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
        }
        Err(e) => {
            warn!(error = %e, "failed to read cluster health");
            return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
        }
    };
    metrics::record_cluster_health(&name, &health);

    let was_initialized = cluster.is_initialized();
    let initialized = was_initialized || formed(cluster, &health);
    if initialized && !was_initialized {
        info!(nodes = health.number_of_nodes, "cluster initialized");
        ctx.publish(
            cluster,
            EventType::Normal,
            reasons::CLUSTER_INITIALIZED,
            actions::RECONCILE,
            format!("Cluster formed with {} nodes", health.number_of_nodes),
        )
        .await;
    }

    let version = cluster
        .status_version()
        .unwrap_or(&cluster.spec.general.version)
        .to_string();
    metrics::record_cluster_info(&name, &version);

    let nodes = i32::try_from(health.number_of_nodes).unwrap_or(i32::MAX);
    let color = health.status.to_string();
    let spec_version = cluster.spec.general.version.clone();
    ctx.update_status(cluster, move |status| {
        status.initialized = initialized;
        if initialized {
            status.phase = ClusterPhase::Running;
        }
        status.available_nodes = nodes;
        status.health = Some(color.clone());
        if status.version.as_deref().map(str::is_empty).unwrap_or(true) {
            status.version = Some(spec_version.clone());
        }
    })
    .await?;

    if initialized {
        Ok(ReconcileResult::done())
    } else {
        Ok(ReconcileResult::requeue_after(REQUEUE_PENDING))
    }
}
