//! ISM and snapshot management policies
//!
//! Both APIs guard replacements with the stored document's sequence number
//! and primary term. Both add bookkeeping fields of their own to what they
//! return; those are stripped before the stored policy is compared, so a
//! field removed from the resource is removed from the engine as well.

use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::{json, Value};

use opensearch_client::compare::semantic_eq;
use opensearch_client::types::VersionedDocument;
use opensearch_client::OpenSearchClient;
use opensearch_common::crd::{
    CronSchedule, EngineObjectStatus, IsmPolicySpec, OpenSearchISMPolicy, OpensearchRef,
    OpensearchSnapshotPolicy, SnapshotPolicySpec,
};
use opensearch_common::Error;

use crate::body::without_nulls;
use crate::context::Context;
use crate::engine_object::EngineObject;

/// Top-level fields the ISM plugin maintains itself
const ISM_ENGINE_FIELDS: &[&str] = &[
    "policy_id",
    "last_updated_time",
    "schema_version",
    "seq_no",
    "primary_term",
    "user",
];

/// Top-level fields the snapshot management plugin maintains itself
const SM_ENGINE_FIELDS: &[&str] = &[
    "name",
    "last_updated_time",
    "enabled_time",
    "schema_version",
    "schedule",
    "seq_no",
    "primary_term",
    "user",
];

fn strip(body: &mut Value, fields: &[&str]) {
    if let Some(map) = body.as_object_mut() {
        for field in fields {
            map.remove(*field);
        }
    }
}

/// Retry settings the ISM plugin fills into actions that set none
fn default_retry() -> Value {
    json!({"count": 3, "backoff": "exponential", "delay": "1m"})
}

/// ISM policy as the operator manages it
///
/// Applied to both sides of the comparison so an explicit default retry in
/// the resource matches the filled-in one.
pub(crate) fn ism_policy_view(body: &Value) -> Value {
    let mut view = body.clone();
    strip(&mut view, ISM_ENGINE_FIELDS);
    if let Some(templates) = view.get_mut("ism_template").and_then(Value::as_array_mut) {
        for template in templates {
            strip(template, &["last_updated_time"]);
        }
    }
    let retry = default_retry();
    if let Some(states) = view.get_mut("states").and_then(Value::as_array_mut) {
        for state in states {
            let Some(actions) = state.get_mut("actions").and_then(Value::as_array_mut) else {
                continue;
            };
            for action in actions {
                if action.get("retry") == Some(&retry) {
                    strip(action, &["retry"]);
                }
            }
        }
    }
    view
}

/// Snapshot management policy as the operator manages it
///
/// The plugin enables policies that do not say otherwise.
pub(crate) fn snapshot_policy_view(body: &Value) -> Value {
    let mut view = body.clone();
    strip(&mut view, SM_ENGINE_FIELDS);
    if view.get("enabled") == Some(&Value::Bool(true)) {
        strip(&mut view, &["enabled"]);
    }
    view
}

/// Engine body of an ISM policy
pub fn ism_policy_body(spec: &IsmPolicySpec) -> Value {
    let states: Vec<Value> = spec
        .states
        .iter()
        .map(|state| {
            let transitions: Vec<Value> = state
                .transitions
                .iter()
                .map(|t| json!({ "state_name": t.state_name, "conditions": t.conditions }))
                .collect();
            json!({
                "name": state.name,
                "actions": state.actions,
                "transitions": transitions,
            })
        })
        .collect();
    let templates: Vec<Value> = spec
        .ism_template
        .iter()
        .map(|t| json!({ "index_patterns": t.index_patterns, "priority": t.priority }))
        .collect();

    without_nulls(json!({
        "description": spec.description,
        "default_state": spec.default_state,
        "states": states,
        "ism_template": templates,
        "error_notification": spec.error_notification,
    }))
}

fn schedule(schedule: &CronSchedule) -> Value {
    json!({
        "cron": {
            "expression": schedule.cron.expression,
            "timezone": schedule.cron.timezone,
        }
    })
}

/// Engine body of a snapshot management policy
pub fn snapshot_policy_body(spec: &SnapshotPolicySpec) -> Value {
    let config = &spec.snapshot_config;
    let deletion = spec.deletion.as_ref().map(|d| {
        json!({
            "schedule": d.schedule.as_ref().map(schedule),
            "condition": d.condition.as_ref().map(|c| json!({
                "max_age": c.max_age,
                "max_count": c.max_count,
                "min_count": c.min_count,
            })),
            "time_limit": d.time_limit,
        })
    });

    without_nulls(json!({
        "description": spec.description,
        "enabled": spec.enabled,
        "snapshot_config": {
            "repository": config.repository,
            "indices": config.indices,
            "date_format": config.date_format,
            "date_format_timezone": config.date_format_timezone,
            "ignore_unavailable": config.ignore_unavailable,
            "include_global_state": config.include_global_state,
            "partial": config.partial,
            "metadata": config.metadata,
        },
        "creation": {
            "schedule": schedule(&spec.creation.schedule),
            "time_limit": spec.creation.time_limit,
        },
        "deletion": deletion,
        "notification": spec.notification,
    }))
}

#[async_trait]
impl EngineObject for OpenSearchISMPolicy {
    const KIND: &'static str = "ISMPolicy";
    type Payload = Value;
    type Current = VersionedDocument;

    fn opensearch_ref(&self) -> &OpensearchRef {
        &self.spec.opensearch_ref
    }

    fn engine_status(&self) -> Option<&EngineObjectStatus> {
        self.status.as_ref()
    }

    fn engine_status_mut(&mut self) -> &mut EngineObjectStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn engine_name(&self) -> String {
        self.spec.policy_id.clone().unwrap_or_else(|| self.name_any())
    }

    async fn desired(&self, _ctx: &Context) -> Result<Value, Error> {
        Ok(ism_policy_body(&self.spec))
    }

    async fn fetch(client: &OpenSearchClient, name: &str) -> Result<Option<VersionedDocument>, Error> {
        Ok(client.get_ism_policy(name).await?)
    }

    fn in_sync(&self, current: &VersionedDocument, desired: &Value) -> bool {
        semantic_eq(&ism_policy_view(&current.body), &ism_policy_view(desired))
    }

    async fn put(
        client: &OpenSearchClient,
        name: &str,
        current: Option<&VersionedDocument>,
        desired: &Value,
    ) -> Result<(), Error> {
        match current {
            Some(doc) => {
                client
                    .update_ism_policy(name, doc.seq_no, doc.primary_term, desired)
                    .await?
            }
            None => client.create_ism_policy(name, desired).await?,
        }
        Ok(())
    }

    async fn remove(&self, client: &OpenSearchClient, name: &str) -> Result<bool, Error> {
        Ok(client.delete_ism_policy(name).await?)
    }
}

#[async_trait]
impl EngineObject for OpensearchSnapshotPolicy {
    const KIND: &'static str = "SnapshotPolicy";
    type Payload = Value;
    type Current = VersionedDocument;

    fn opensearch_ref(&self) -> &OpensearchRef {
        &self.spec.opensearch_ref
    }

    fn engine_status(&self) -> Option<&EngineObjectStatus> {
        self.status.as_ref()
    }

    fn engine_status_mut(&mut self) -> &mut EngineObjectStatus {
        self.status.get_or_insert_with(Default::default)
    }

    fn engine_name(&self) -> String {
        self.spec.policy_name.clone()
    }

    async fn desired(&self, _ctx: &Context) -> Result<Value, Error> {
        Ok(snapshot_policy_body(&self.spec))
    }

    async fn fetch(client: &OpenSearchClient, name: &str) -> Result<Option<VersionedDocument>, Error> {
        Ok(client.get_snapshot_policy(name).await?)
    }

    fn in_sync(&self, current: &VersionedDocument, desired: &Value) -> bool {
        semantic_eq(
            &snapshot_policy_view(&current.body),
            &snapshot_policy_view(desired),
        )
    }

    async fn put(
        client: &OpenSearchClient,
        name: &str,
        current: Option<&VersionedDocument>,
        desired: &Value,
    ) -> Result<(), Error> {
        match current {
            Some(doc) => {
                client
                    .update_snapshot_policy(name, doc.seq_no, doc.primary_term, desired)
                    .await?
            }
            None => client.create_snapshot_policy(name, desired).await?,
        }
        Ok(())
    }

    async fn remove(&self, client: &OpenSearchClient, name: &str) -> Result<bool, Error> {
        Ok(client.delete_snapshot_policy(name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ism_policy, snapshot_policy, Harness, NAMESPACE};
    use opensearch_client::Method;
    use opensearch_common::crd::{DeletionCondition, ResourceState, SnapshotDeletion};

    const ISM_ROUTE: &str = "/_plugins/_ism/policies/rollover";
    const SM_ROUTE: &str = "/_plugins/_sm/policies/nightly";

    #[test]
    fn ism_body_uses_engine_field_names() {
        let body = ism_policy_body(&ism_policy("rollover").spec);
        assert_eq!(body["default_state"], json!("hot"));
        assert_eq!(
            body["states"][0]["transitions"][0],
            json!({"state_name": "delete", "conditions": {"min_index_age": "7d"}})
        );
        assert!(body.get("error_notification").is_none());
    }

    #[test]
    fn snapshot_body_nests_the_cron_schedule() {
        let body = snapshot_policy_body(&snapshot_policy("nightly").spec);
        assert_eq!(
            body["creation"],
            json!({"schedule": {"cron": {"expression": "0 2 * * *", "timezone": "UTC"}}})
        );
        assert_eq!(body["snapshot_config"], json!({"repository": "backups"}));
        assert!(body.get("deletion").is_none());
    }

    #[tokio::test]
    async fn ism_policy_update_carries_the_concurrency_guard() {
        let h = Harness::running().await;
        h.store.insert(&ism_policy("rollover")).await;
        h.reconcile::<OpenSearchISMPolicy>("rollover")
            .await
            .expect("create");

        h.engine.clear_requests().await;
        h.reconcile::<OpenSearchISMPolicy>("rollover")
            .await
            .expect("steady");
        assert!(h.engine.writes().await.is_empty());

        h.store
            .modify::<OpenSearchISMPolicy>(NAMESPACE, "rollover", |p| {
                p.spec.description = Some("keep a month".to_string());
            })
            .await;
        h.reconcile::<OpenSearchISMPolicy>("rollover")
            .await
            .expect("update");

        let writes = h.engine.writes().await;
        assert_eq!(writes.len(), 1);
        assert!(writes[0].query_param("if_seq_no").is_some());
        assert!(writes[0].query_param("if_primary_term").is_some());
        let stored = h.engine.document(ISM_ROUTE).await.expect("stored");
        assert_eq!(stored["policy"]["description"], json!("keep a month"));
    }

    #[test]
    fn ism_view_drops_plugin_bookkeeping() {
        let stored = json!({
            "policy_id": "rollover",
            "schema_version": 17,
            "last_updated_time": 1700000000000i64,
            "error_notification": null,
            "default_state": "hot",
            "states": [{
                "name": "hot",
                "actions": [{"retry": {"count": 3, "backoff": "exponential", "delay": "1m"}, "rollover": {}}],
                "transitions": [],
            }],
            "ism_template": [{"index_patterns": ["logs-*"], "priority": 1, "last_updated_time": 1}],
        });
        let desired = json!({
            "default_state": "hot",
            "states": [{"name": "hot", "actions": [{"rollover": {}}], "transitions": []}],
            "ism_template": [{"index_patterns": ["logs-*"], "priority": 1}],
        });
        assert!(semantic_eq(&ism_policy_view(&stored), &ism_policy_view(&desired)));

        let custom_retry = json!({
            "default_state": "hot",
            "states": [{"name": "hot", "actions": [{"retry": {"count": 5}, "rollover": {}}], "transitions": []}],
        });
        assert!(!semantic_eq(&ism_policy_view(&stored), &ism_policy_view(&custom_retry)));
    }

    #[tokio::test]
    async fn removed_ism_description_is_removed_from_the_engine() {
        let h = Harness::running().await;
        h.store.insert(&ism_policy("rollover")).await;
        h.reconcile::<OpenSearchISMPolicy>("rollover")
            .await
            .expect("create");

        h.engine.clear_requests().await;
        h.store
            .modify::<OpenSearchISMPolicy>(NAMESPACE, "rollover", |p| {
                p.spec.description = None;
            })
            .await;
        h.reconcile::<OpenSearchISMPolicy>("rollover")
            .await
            .expect("update");

        assert_eq!(h.engine.writes().await.len(), 1);
        let stored = h.engine.document(ISM_ROUTE).await.expect("stored");
        assert!(stored["policy"].get("description").is_none());

        h.engine.clear_requests().await;
        h.reconcile::<OpenSearchISMPolicy>("rollover")
            .await
            .expect("steady");
        assert!(h.engine.writes().await.is_empty());
    }

    #[tokio::test]
    async fn removed_snapshot_deletion_is_removed_from_the_engine() {
        let mut policy = snapshot_policy("nightly");
        policy.spec.deletion = Some(SnapshotDeletion {
            schedule: None,
            condition: Some(DeletionCondition {
                max_age: Some("30d".to_string()),
                max_count: None,
                min_count: Some(1),
            }),
            time_limit: None,
        });
        let h = Harness::running().await;
        h.store.insert(&policy).await;
        h.reconcile::<OpensearchSnapshotPolicy>("nightly")
            .await
            .expect("create");

        h.engine.clear_requests().await;
        h.reconcile::<OpensearchSnapshotPolicy>("nightly")
            .await
            .expect("steady");
        assert!(h.engine.writes().await.is_empty());

        h.store
            .modify::<OpensearchSnapshotPolicy>(NAMESPACE, "nightly", |p| {
                p.spec.deletion = None;
            })
            .await;
        h.reconcile::<OpensearchSnapshotPolicy>("nightly")
            .await
            .expect("update");

        assert_eq!(h.engine.count(Method::Put, SM_ROUTE).await, 1);
        let stored = h.engine.document(SM_ROUTE).await.expect("stored");
        assert!(stored.get("deletion").is_none());
    }

    #[tokio::test]
    async fn snapshot_policy_is_created_then_updated() {
        let h = Harness::running().await;
        h.store.insert(&snapshot_policy("nightly")).await;
        h.reconcile::<OpensearchSnapshotPolicy>("nightly")
            .await
            .expect("create");
        assert_eq!(h.engine.count(Method::Post, SM_ROUTE).await, 1);

        h.store
            .modify::<OpensearchSnapshotPolicy>(NAMESPACE, "nightly", |p| {
                p.spec.enabled = Some(false);
            })
            .await;
        h.reconcile::<OpensearchSnapshotPolicy>("nightly")
            .await
            .expect("update");

        assert_eq!(h.engine.count(Method::Put, SM_ROUTE).await, 1);
        let stored = h.engine.document(SM_ROUTE).await.expect("stored");
        assert_eq!(stored["enabled"], json!(false));
        let status = h
            .get::<OpensearchSnapshotPolicy>("nightly")
            .await
            .status
            .expect("status");
        assert_eq!(status.state, Some(ResourceState::Created));
        assert_eq!(status.engine_name.as_deref(), Some("nightly"));
    }

    #[tokio::test]
    async fn engine_conflict_fails_the_reconcile() {
        let h = Harness::running().await;
        h.store.insert(&ism_policy("rollover")).await;
        h.reconcile::<OpenSearchISMPolicy>("rollover")
            .await
            .expect("create");
        h.store
            .modify::<OpenSearchISMPolicy>(NAMESPACE, "rollover", |p| {
                p.spec.default_state = "delete".to_string();
            })
            .await;
        h.engine.fail_next(409, "version conflict").await;

        let err = h
            .reconcile::<OpenSearchISMPolicy>("rollover")
            .await
            .expect_err("conflict should surface");
        assert!(matches!(err, Error::Api { status: 409, .. }));
    }
}
