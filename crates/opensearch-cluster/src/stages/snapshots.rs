//! Snapshot repositories declared on the cluster
//!
//! Repositories are created when missing and replaced when their type or
//! settings drift. Repositories dropped from the cluster spec stay in the engine,
//! since snapshots in them may still be needed.

use kube::runtime::events::EventType;
use serde_json::Value;
use tracing::{debug, info};

use opensearch_client::compare::payload_eq;
use opensearch_client::types::SnapshotRepository;
use opensearch_common::crd::{OpenSearchCluster, SnapshotRepositoryConfig};
use opensearch_common::events::{actions, reasons};
use opensearch_common::reconcile::ReconcileResult;
use opensearch_common::Error;

use crate::controller::Context;

fn desired(config: &SnapshotRepositoryConfig) -> SnapshotRepository {
    SnapshotRepository {
        type_: config.type_.clone(),
        settings: config
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    }
}

/// Create or update every declared repository
pub async fn reconcile(cluster: &OpenSearchCluster, ctx: &Context) -> Result<ReconcileResult, Error> {
    let repositories = &cluster.spec.general.snapshot_repositories;
    if repositories.is_empty() || !cluster.is_running() {
        return Ok(ReconcileResult::done());
    }
    let client = ctx.client(cluster).await?;

    for config in repositories {
        let wanted = desired(config);
        let note = match client.get_snapshot_repository(&config.name).await? {
            Some(current) if payload_eq(&current, &wanted) => {
                debug!(repository = %config.name, "snapshot repository in sync");
                continue;
            }
            Some(_) => format!("Updated snapshot repository {}", config.name),
            None => format!("Created snapshot repository {}", config.name),
        };
        client.put_snapshot_repository(&config.name, &wanted).await?;
        info!(repository = %config.name, kind = %config.type_, "applied snapshot repository");
        ctx.publish(
            cluster,
            EventType::Normal,
            reasons::SNAPSHOT_REPOSITORY,
            actions::APPLY,
            note,
        )
        .await;
    }
    Ok(ReconcileResult::done())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cluster, running, Harness};
    use opensearch_client::Method;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn backups() -> SnapshotRepositoryConfig {
        SnapshotRepositoryConfig {
            name: "backups".to_string(),
            type_: "fs".to_string(),
            settings: BTreeMap::from([("location".to_string(), "/mnt/backups".to_string())]),
        }
    }

    fn with_repositories(repositories: Vec<SnapshotRepositoryConfig>) -> OpenSearchCluster {
        let mut c = running(cluster(vec![]), "2.11.0");
        c.spec.general.snapshot_repositories = repositories;
        c
    }

    #[tokio::test]
    async fn missing_repository_is_created() {
        let h = Harness::new();
        let c = h.insert(&with_repositories(vec![backups()])).await;

        reconcile(&c, &h.ctx).await.unwrap();

        assert_eq!(
            h.engine.document("/_snapshot/backups").await,
            Some(json!({"type": "fs", "settings": {"location": "/mnt/backups"}}))
        );
        assert!(h.events.has_reason(reasons::SNAPSHOT_REPOSITORY).await);
    }

    #[tokio::test]
    async fn matching_repository_is_left_alone() {
        let h = Harness::new();
        let c = h.insert(&with_repositories(vec![backups()])).await;
        h.engine
            .seed(
                "/_snapshot/backups",
                json!({"type": "fs", "settings": {"location": "/mnt/backups"}}),
            )
            .await;

        reconcile(&c, &h.ctx).await.unwrap();

        assert_eq!(h.engine.count(Method::Put, "/_snapshot/").await, 0);
    }

    #[tokio::test]
    async fn drifted_settings_are_replaced() {
        let h = Harness::new();
        let c = h.insert(&with_repositories(vec![backups()])).await;
        h.engine
            .seed(
                "/_snapshot/backups",
                json!({"type": "fs", "settings": {"location": "/tmp"}}),
            )
            .await;

        reconcile(&c, &h.ctx).await.unwrap();

        assert_eq!(h.engine.count(Method::Put, "/_snapshot/").await, 1);
        let stored = h.engine.document("/_snapshot/backups").await.unwrap();
        assert_eq!(stored["settings"]["location"], json!("/mnt/backups"));
    }

    #[tokio::test]
    async fn forming_cluster_is_skipped() {
        let h = Harness::new();
        let mut c = with_repositories(vec![backups()]);
        c.status = None;
        let c = h.insert(&c).await;

        reconcile(&c, &h.ctx).await.unwrap();

        assert!(h.engine.requests().await.is_empty());
    }
}
