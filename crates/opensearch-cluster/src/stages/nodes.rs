//! Services, node pool stateful sets, disruption budgets and the bootstrap pod
//!
//! Replica counts are read back from the live stateful set: the scaler owns
//! them, this stage only keeps the rest of the template in line with the
//! spec. A pool whose data volumes grew has its claims resized and its
//! stateful set recreated with orphaned pods.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{info, warn};

use opensearch_common::crd::{components, NodePool, OpenSearchCluster};
use opensearch_common::events::{actions, reasons};
use opensearch_common::k8s::DesiredState;
use opensearch_common::kube_utils::pool_labels;
use opensearch_common::reconcile::ReconcileResult;
use opensearch_common::store::Propagation;
use opensearch_common::Error;

use crate::builders;
use crate::controller::Context;
use crate::names;
use crate::setup::NodeSetup;

/// Engine version a pool should run right now
///
/// During an upgrade only pools the upgrader has started move to the new
/// version; the rest keep the version recorded in status.
pub fn pool_version(cluster: &OpenSearchCluster, pool: &NodePool) -> String {
    let target = cluster.spec.general.version.clone();
    let Some(current) = cluster.status_version() else {
        return target;
    };
    if current == target {
        return target;
    }
    let started = cluster
        .status
        .as_ref()
        .and_then(|s| s.component(components::UPGRADER, Some(&pool.component)))
        .map(|c| c.status == components::UPGRADING || c.status == components::UPGRADED)
        .unwrap_or(false);
    if started {
        target
    } else {
        current.to_string()
    }
}

/// Size in bytes of a storage quantity such as `10Gi` or `500M`
///
/// None when the quantity does not parse or does not fit in 128 bits.
pub fn quantity_bytes(quantity: &str) -> Option<u128> {
    const SUFFIXES: &[(&str, u128)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
    ];
    let quantity = quantity.trim();
    for (suffix, factor) in SUFFIXES {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return number.parse::<u128>().ok()?.checked_mul(*factor);
        }
    }
    quantity.parse().ok()
}

fn claimed_size(sts: &StatefulSet) -> Option<String> {
    sts.spec
        .as_ref()?
        .volume_claim_templates
        .as_ref()?
        .first()?
        .spec
        .as_ref()?
        .resources
        .as_ref()?
        .requests
        .as_ref()?
        .get("storage")
        .map(|q| q.0.clone())
}

/// Resize the pool's claims and recreate its stateful set around the pods
async fn expand_volumes(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    pool: &NodePool,
    desired: &StatefulSet,
    size: &str,
) -> Result<(), Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    let sts_name = names::statefulset(&name, &pool.component);

    let claims = ctx
        .k8s
        .list::<PersistentVolumeClaim>(&namespace, &pool_labels(&name, &pool.component))
        .await?;
    for mut claim in claims {
        if let Some(requests) = claim
            .spec
            .as_mut()
            .and_then(|s| s.resources.as_mut())
            .and_then(|r| r.requests.as_mut())
        {
            requests.insert("storage".to_string(), Quantity(size.to_string()));
        }
        ctx.k8s.update(&claim).await?;
    }

    ctx.k8s
        .delete::<StatefulSet>(&namespace, &sts_name, Propagation::Orphan)
        .await?;
    ctx.k8s
        .wait_for_statefulset_delete(&namespace, &sts_name)
        .await?;
    ctx.k8s.create(desired).await?;

    info!(pool = %pool.component, size, "expanded data volumes");
    ctx.publish(
        cluster,
        EventType::Normal,
        reasons::VOLUME_EXPANSION,
        actions::APPLY,
        format!("Expanded volumes of {} to {}", sts_name, size),
    )
    .await;
    Ok(())
}

async fn reconcile_pool(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    setup: &NodeSetup,
    pool: &NodePool,
) -> Result<(), Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let sts_name = names::statefulset(&cluster.name_any(), &pool.component);

    let existing = ctx.k8s.get::<StatefulSet>(&namespace, &sts_name).await?;
    let replicas = existing
        .as_ref()
        .and_then(|s| s.spec.as_ref())
        .and_then(|s| s.replicas)
        .unwrap_or(pool.replicas);
    let mut desired = builders::statefulset(
        cluster,
        pool,
        setup,
        &pool_version(cluster, pool),
        replicas,
        ctx.config.parallel_recovery_enabled,
    )?;

    let Some(existing) = existing else {
        ctx.k8s.create(&desired).await?;
        return Ok(());
    };

    let wanted = builders::disk_size(pool);
    let claimed = claimed_size(&existing);
    let has_claims = desired
        .spec
        .as_ref()
        .map(|s| s.volume_claim_templates.is_some())
        .unwrap_or(false);
    if let (Some(claimed), true) = (claimed, has_claims) {
        match (quantity_bytes(&claimed), quantity_bytes(&wanted)) {
            (Some(old), Some(new)) if new > old => {
                return expand_volumes(cluster, ctx, pool, &desired, &wanted).await;
            }
            (Some(old), Some(new)) if new < old => {
                warn!(pool = %pool.component, %claimed, %wanted, "data volumes cannot shrink");
                ctx.publish(
                    cluster,
                    EventType::Warning,
                    reasons::VOLUME_EXPANSION,
                    actions::APPLY,
                    format!("Cannot shrink volumes of {} from {} to {}", sts_name, claimed, wanted),
                )
                .await;
                if let (Some(spec), Some(current)) = (desired.spec.as_mut(), existing.spec.as_ref()) {
                    spec.volume_claim_templates = current.volume_claim_templates.clone();
                }
            }
            _ => {}
        }
    }

    ctx.k8s.reconcile(&desired, DesiredState::Present).await?;
    Ok(())
}

/// Drive services, stateful sets, budgets and the bootstrap pod
pub async fn reconcile(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    setup: &NodeSetup,
) -> Result<ReconcileResult, Error> {
    ctx.k8s
        .reconcile(&builders::engine_config(cluster, setup)?, DesiredState::Present)
        .await?;
    ctx.k8s
        .reconcile(&builders::cluster_service(cluster)?, DesiredState::Present)
        .await?;
    ctx.k8s
        .reconcile(&builders::discovery_service(cluster)?, DesiredState::Present)
        .await?;

    for pool in &cluster.spec.node_pools {
        ctx.k8s
            .reconcile(&builders::pool_service(cluster, pool)?, DesiredState::Present)
            .await?;
        reconcile_pool(cluster, ctx, setup, pool).await?;

        let enabled = pool.pdb.as_ref().map(|p| p.enable).unwrap_or(false);
        let state = if enabled {
            DesiredState::Present
        } else {
            DesiredState::Absent
        };
        ctx.k8s.reconcile(&builders::pdb(cluster, pool)?, state).await?;
    }

    let bootstrap = builders::bootstrap_pod(cluster, setup)?;
    if cluster.is_initialized() {
        if ctx
            .k8s
            .reconcile(&bootstrap, DesiredState::Absent)
            .await?
            .changed()
        {
            info!("cluster initialized, removed bootstrap pod");
        }
    } else {
        ctx.k8s.reconcile(&bootstrap, DesiredState::Created).await?;
    }

    Ok(ReconcileResult::done())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cluster, pool, running, Harness, NAMESPACE};
    use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
    use k8s_openapi::api::policy::v1::PodDisruptionBudget;
    use opensearch_common::crd::{ClusterStatus, ComponentStatus, PdbConfig};

    async fn statefulset(h: &Harness, name: &str) -> StatefulSet {
        h.store
            .fetch::<StatefulSet>(NAMESPACE, name)
            .await
            .unwrap_or_else(|| panic!("statefulset {} should exist", name))
    }

    #[tokio::test]
    async fn new_cluster_gets_every_derived_object() {
        let h = Harness::new();
        let mut data = pool("data", 2, &["data"]);
        data.pdb = Some(PdbConfig {
            enable: true,
            ..Default::default()
        });
        let c = h
            .insert(&cluster(vec![pool("masters", 3, &["cluster_manager"]), data]))
            .await;

        reconcile(&c, &h.ctx, &NodeSetup::default()).await.unwrap();

        let services: Vec<String> = h
            .store
            .all::<Service>(NAMESPACE)
            .await
            .iter()
            .map(|s| s.name_any())
            .collect();
        for expected in ["logs", "logs-discovery", "logs-masters", "logs-data"] {
            assert!(services.contains(&expected.to_string()), "{}", expected);
        }
        assert!(h.store.fetch::<ConfigMap>(NAMESPACE, "logs-config").await.is_some());
        let masters = statefulset(&h, "logs-masters").await;
        assert_eq!(masters.spec.and_then(|s| s.replicas), Some(3));
        assert!(h.store.fetch::<Pod>(NAMESPACE, "logs-bootstrap-0").await.is_some());
        assert!(h
            .store
            .fetch::<PodDisruptionBudget>(NAMESPACE, "logs-data-pdb")
            .await
            .is_some());
        assert!(h
            .store
            .fetch::<PodDisruptionBudget>(NAMESPACE, "logs-masters-pdb")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn live_replica_count_is_preserved() {
        let h = Harness::new();
        let c = h.insert(&cluster(vec![pool("data", 3, &["data"])])).await;
        reconcile(&c, &h.ctx, &NodeSetup::default()).await.unwrap();
        h.store
            .modify::<StatefulSet>(NAMESPACE, "logs-data", |sts| {
                if let Some(spec) = sts.spec.as_mut() {
                    spec.replicas = Some(2);
                }
            })
            .await;

        reconcile(&c, &h.ctx, &NodeSetup::default()).await.unwrap();

        assert_eq!(
            statefulset(&h, "logs-data").await.spec.and_then(|s| s.replicas),
            Some(2)
        );
    }

    #[tokio::test]
    async fn bootstrap_pod_is_created_once_and_removed_after_initialization() {
        let h = Harness::new();
        let c = h.insert(&cluster(vec![pool("masters", 3, &["cluster_manager"])])).await;

        reconcile(&c, &h.ctx, &NodeSetup::default()).await.unwrap();
        let mut setup = NodeSetup::default();
        setup.set("node.attr.zone", "a");
        reconcile(&c, &h.ctx, &setup).await.unwrap();

        let pod = h
            .store
            .fetch::<Pod>(NAMESPACE, "logs-bootstrap-0")
            .await
            .unwrap();
        let checksum = &pod.annotations()[names::CONFIG_ANNOTATION];
        assert_eq!(checksum, &NodeSetup::default().checksum().unwrap());

        let c = h.insert(&running(c, "2.11.0")).await;
        reconcile(&c, &h.ctx, &NodeSetup::default()).await.unwrap();
        assert!(h.store.fetch::<Pod>(NAMESPACE, "logs-bootstrap-0").await.is_none());
    }

    #[tokio::test]
    async fn grown_disks_recreate_the_statefulset_with_orphaned_pods() {
        let h = Harness::new();
        let c = h.insert(&cluster(vec![pool("data", 1, &["data"])])).await;
        reconcile(&c, &h.ctx, &NodeSetup::default()).await.unwrap();
        let sts = statefulset(&h, "logs-data").await;
        let claim = PersistentVolumeClaim {
            metadata: kube::api::ObjectMeta {
                name: Some("data-logs-data-0".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(pool_labels("logs", "data")),
                ..Default::default()
            },
            spec: sts.spec.as_ref().unwrap().volume_claim_templates.as_ref().unwrap()[0]
                .spec
                .clone(),
            ..Default::default()
        };
        h.store.insert(&claim).await;

        let mut grown = c.clone();
        grown.spec.node_pools[0].disk_size = Some("20Gi".to_string());
        reconcile(&grown, &h.ctx, &NodeSetup::default()).await.unwrap();

        let deletions = h.store.deletions().await;
        assert!(deletions
            .iter()
            .any(|d| d.name == "logs-data" && d.propagation == Propagation::Orphan));
        assert_eq!(
            claimed_size(&statefulset(&h, "logs-data").await).as_deref(),
            Some("20Gi")
        );
        let resized = h
            .store
            .fetch::<PersistentVolumeClaim>(NAMESPACE, "data-logs-data-0")
            .await
            .unwrap();
        let requests = resized.spec.unwrap().resources.unwrap().requests.unwrap();
        assert_eq!(requests["storage"], Quantity("20Gi".to_string()));
        assert!(h.events.has_reason(reasons::VOLUME_EXPANSION).await);
    }

    #[tokio::test]
    async fn shrinking_disks_is_refused() {
        let h = Harness::new();
        let c = h.insert(&cluster(vec![pool("data", 1, &["data"])])).await;
        reconcile(&c, &h.ctx, &NodeSetup::default()).await.unwrap();

        let mut shrunk = c.clone();
        shrunk.spec.node_pools[0].disk_size = Some("5Gi".to_string());
        reconcile(&shrunk, &h.ctx, &NodeSetup::default()).await.unwrap();

        assert_eq!(
            claimed_size(&statefulset(&h, "logs-data").await).as_deref(),
            Some("10Gi")
        );
        let events = h.events.events().await;
        assert!(events
            .iter()
            .any(|e| e.warning && e.reason == reasons::VOLUME_EXPANSION));
    }

    #[test]
    fn pools_keep_the_old_version_until_the_upgrader_reaches_them() {
        let data = pool("data", 2, &["data"]);
        let masters = pool("masters", 3, &["cluster_manager"]);
        let mut c = cluster(vec![data.clone(), masters.clone()]);
        c.spec.general.version = "2.12.0".to_string();
        c.status = Some(ClusterStatus {
            version: Some("2.11.0".to_string()),
            components_status: vec![ComponentStatus::new(
                components::UPGRADER,
                components::UPGRADING,
                Some("data"),
            )],
            ..Default::default()
        });

        assert_eq!(pool_version(&c, &data), "2.12.0");
        assert_eq!(pool_version(&c, &masters), "2.11.0");
    }

    #[test]
    fn quantities_compare_by_size() {
        assert_eq!(quantity_bytes("10Gi"), Some(10 << 30));
        assert_eq!(quantity_bytes("500M"), Some(500_000_000));
        assert_eq!(quantity_bytes("1024"), Some(1024));
        assert!(quantity_bytes("1Ti") > quantity_bytes("1000Gi"));
        assert_eq!(quantity_bytes("lots"), None);
        assert_eq!(quantity_bytes(&format!("{}Pi", u128::MAX / 2)), None);
    }
}
