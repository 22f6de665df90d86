//! Reconcile contract shared by every in-engine object kind
//!
//! A resource is bound to the cluster its `opensearchRef` names the first
//! time it is reconciled, and only ever to that cluster's UID afterwards.
//! The first reconcile also probes the engine: an object that is already
//! there is recorded as `existing` and only observed from then on. Objects
//! the operator created are kept in sync through [`EngineObject`] and are
//! removed from the engine when the resource is deleted.
//!
//! The status write is deferred to the end of the reconcile and derives the
//! state from the outcome with [`derive_state`].

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use opensearch_client::OpenSearchClient;
use opensearch_common::crd::{EngineObjectStatus, OpenSearchCluster, OpensearchRef};
use opensearch_common::events::{actions, reasons};
use opensearch_common::k8s::Object;
use opensearch_common::kube_utils::{add_finalizer, has_finalizer, is_deleting, remove_finalizer};
use opensearch_common::metrics;
use opensearch_common::reconcile::{derive_state, ReconcileResult, REQUEUE_PENDING, REQUEUE_STEADY};
use opensearch_common::Error;

use crate::context::Context;

/// A custom resource mirrored into one object of the engine's admin API
#[async_trait]
pub trait EngineObject: Object + Debug {
    /// Kind name used in reasons, logs and metrics
    const KIND: &'static str;

    /// Body written to the engine
    type Payload: Clone + Send + Sync;
    /// Engine copy returned by a read
    type Current: Send + Sync;

    /// Cluster the resource belongs to
    fn opensearch_ref(&self) -> &OpensearchRef;

    /// Shared part of the status, if any
    fn engine_status(&self) -> Option<&EngineObjectStatus>;

    /// Shared part of the status, created when missing
    fn engine_status_mut(&mut self) -> &mut EngineObjectStatus;

    /// Name of the object in the engine
    fn engine_name(&self) -> String {
        self.name_any()
    }

    /// Payload the resource spec translates to
    async fn desired(&self, ctx: &Context) -> Result<Self::Payload, Error>;

    /// Read the engine copy; None when absent
    async fn fetch(client: &OpenSearchClient, name: &str) -> Result<Option<Self::Current>, Error>;

    /// Whether the engine copy already means the same as the payload
    fn in_sync(&self, current: &Self::Current, desired: &Self::Payload) -> bool;

    /// Create the object, or replace `current` with the payload
    async fn put(
        client: &OpenSearchClient,
        name: &str,
        current: Option<&Self::Current>,
        desired: &Self::Payload,
    ) -> Result<(), Error>;

    /// Remove the object from the engine; false when it was not removed
    async fn remove(&self, client: &OpenSearchClient, name: &str) -> Result<bool, Error>;

    /// Record kind-specific status after the payload was written
    fn record_write(&mut self, _desired: &Self::Payload) {}

    /// Event reason for a failed reconcile
    fn failure_reason(&self, error: &Error) -> &'static str {
        failure_reason(error)
    }
}

/// Event reason for a failed reconcile
pub(crate) fn failure_reason(error: &Error) -> &'static str {
    match error {
        Error::RefMismatch { .. } => reasons::REF_MISMATCH,
        Error::NameMismatch { .. } => reasons::NAME_MISMATCH,
        _ => reasons::API_ERROR,
    }
}

/// Values collected during a reconcile for the deferred status write
pub(crate) struct Outcome<P> {
    pub reason: Option<String>,
    pub managed_cluster: Option<String>,
    pub existing: Option<bool>,
    pub engine_name: Option<String>,
    pub written: Option<P>,
}

impl<P> Outcome<P> {
    pub fn new(status: Option<&EngineObjectStatus>) -> Self {
        Self {
            reason: None,
            managed_cluster: status.and_then(|s| s.managed_cluster.clone()),
            existing: status.and_then(|s| s.existing),
            engine_name: status.and_then(|s| s.engine_name.clone()),
            written: None,
        }
    }
}

/// Result of resolving the cluster a resource points at
pub(crate) enum Binding {
    /// Cluster is running; engine calls may proceed
    Ready(OpenSearchClient),
    /// Cluster missing or not running yet
    Waiting(String),
}

/// Resolve, bind and connect to the cluster a resource references
///
/// Records the cluster UID in `managed_cluster` on first binding and fails
/// when a later reconcile resolves to a different UID.
pub(crate) async fn bind<K: Object>(
    obj: &K,
    reference: &OpensearchRef,
    managed_cluster: &mut Option<String>,
    ctx: &Context,
) -> Result<Binding, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let Some(cluster) = ctx
        .k8s
        .get::<OpenSearchCluster>(&namespace, &reference.name)
        .await?
    else {
        return Ok(Binding::Waiting(format!(
            "Waiting for cluster {} to be created",
            reference.name
        )));
    };

    let uid = cluster.uid().unwrap_or_default();
    match managed_cluster.as_deref() {
        Some(bound) if bound != uid => {
            return Err(Error::RefMismatch {
                resource: obj.name_any(),
                expected: bound.to_string(),
                found: uid,
            });
        }
        Some(_) => {}
        None => *managed_cluster = Some(uid),
    }

    if !cluster.is_running() {
        return Ok(Binding::Waiting(format!(
            "Waiting for cluster {} to be running",
            reference.name
        )));
    }

    Ok(Binding::Ready(ctx.client(&cluster).await?))
}

/// Engine client of the bound cluster for cleanup; None when engine calls
/// must be skipped
pub(crate) async fn owning_client<K: Object>(
    obj: &K,
    reference: &OpensearchRef,
    managed_cluster: Option<&str>,
    ctx: &Context,
) -> Result<Option<OpenSearchClient>, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let Some(cluster) = ctx
        .k8s
        .get::<OpenSearchCluster>(&namespace, &reference.name)
        .await?
    else {
        debug!(cluster = %reference.name, "cluster gone, skipping engine cleanup");
        return Ok(None);
    };
    if is_deleting(&cluster) {
        debug!(cluster = %reference.name, "cluster is being deleted, skipping engine cleanup");
        return Ok(None);
    }
    if managed_cluster.is_some_and(|bound| Some(bound) != cluster.uid().as_deref()) {
        debug!(cluster = %reference.name, "cluster was replaced, skipping engine cleanup");
        return Ok(None);
    }
    Ok(Some(ctx.client(&cluster).await?))
}

/// Add the operator finalizer when missing
pub(crate) async fn ensure_finalizer<K: Object>(obj: &K, ctx: &Context) -> Result<(), Error> {
    if has_finalizer(obj) {
        return Ok(());
    }
    let mut updated = obj.clone();
    add_finalizer(&mut updated);
    ctx.k8s.update(&updated).await?;
    Ok(())
}

/// Drop the operator finalizer so deletion can complete
pub(crate) async fn release_finalizer<K: Object>(obj: &K, ctx: &Context) -> Result<(), Error> {
    let mut updated = obj.clone();
    if remove_finalizer(&mut updated) {
        ctx.k8s.update(&updated).await?;
    }
    Ok(())
}

/// Turn pending errors into a pending requeue and publish the outcome event
pub(crate) async fn settle<K: Object>(
    obj: &K,
    ctx: &Context,
    result: Result<ReconcileResult, Error>,
    reason: &mut Option<String>,
    failure: impl Fn(&Error) -> &'static str,
) -> Result<ReconcileResult, Error> {
    let result = match result {
        Err(e) if e.is_pending() => {
            *reason = Some(e.to_string());
            Ok(ReconcileResult::requeue_after(REQUEUE_PENDING))
        }
        Err(e) => {
            warn!(error = %e, "reconcile failed");
            ctx.publish(obj, EventType::Warning, failure(&e), actions::RECONCILE, e.to_string())
                .await;
            return Err(e);
        }
        Ok(result) => Ok(result),
    };
    if let (Ok(r), Some(note)) = (&result, reason.as_ref()) {
        if r.requeue_after == Some(REQUEUE_PENDING) {
            debug!(%note, "waiting on a prerequisite");
            ctx.publish(obj, EventType::Normal, reasons::PENDING, actions::RECONCILE, note.clone())
                .await;
        }
    }
    result
}

/// Reconcile one in-engine object resource
#[instrument(skip(obj, ctx), fields(kind = O::KIND, name = %obj.name_any()))]
pub async fn reconcile<O: EngineObject>(obj: Arc<O>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start = Instant::now();
    let result = if is_deleting(obj.as_ref()) {
        cleanup(obj.as_ref(), &ctx).await
    } else {
        apply(obj.as_ref(), &ctx).await
    };
    metrics::record_reconcile(
        O::KIND,
        start.elapsed().as_secs_f64(),
        result.as_ref().err().map(Error::is_retryable),
    );
    result.map(ReconcileResult::into_action)
}

async fn apply<O: EngineObject>(obj: &O, ctx: &Context) -> Result<ReconcileResult, Error> {
    ensure_finalizer(obj, ctx).await?;

    let mut outcome = Outcome::new(obj.engine_status());
    let result = sync(obj, ctx, &mut outcome).await;
    let result = settle(obj, ctx, result, &mut outcome.reason, |e| obj.failure_reason(e)).await;
    write_status(obj, ctx, &result, &outcome).await?;
    result
}

/// Steps one to eight: bind, probe, check the name, converge
async fn sync<O: EngineObject>(
    obj: &O,
    ctx: &Context,
    outcome: &mut Outcome<O::Payload>,
) -> Result<ReconcileResult, Error> {
    let client = match bind(obj, obj.opensearch_ref(), &mut outcome.managed_cluster, ctx).await? {
        Binding::Ready(client) => client,
        Binding::Waiting(reason) => {
            outcome.reason = Some(reason);
            return Ok(ReconcileResult::requeue_after(REQUEUE_PENDING));
        }
    };
    let name = obj.engine_name();

    let probed = match outcome.existing {
        Some(_) => None,
        None => {
            let found = O::fetch(&client, &name).await?;
            outcome.existing = Some(found.is_some());
            Some(found)
        }
    };
    if outcome.existing == Some(true) {
        debug!(engine_name = %name, "object predates the resource, observing only");
        let reason = format!("{} already exists", O::KIND);
        if probed.is_some() {
            ctx.publish(obj, EventType::Normal, reasons::ALREADY_EXISTS, actions::RECONCILE, reason.clone())
                .await;
        }
        outcome.reason = Some(reason);
        return Ok(ReconcileResult::requeue_after(REQUEUE_STEADY));
    }

    if let Some(previous) = outcome.engine_name.as_deref() {
        if previous != name {
            return Err(Error::NameMismatch {
                resource: obj.name_any(),
                previous: previous.to_string(),
                requested: name,
            });
        }
    }
    outcome.engine_name = Some(name.clone());

    let desired = obj.desired(ctx).await?;
    let current = match probed {
        Some(found) => found,
        None => O::fetch(&client, &name).await?,
    };
    let note = match &current {
        Some(current) if obj.in_sync(current, &desired) => {
            debug!(engine_name = %name, "in sync");
            return Ok(ReconcileResult::requeue_after(REQUEUE_STEADY));
        }
        Some(_) => format!("Updated {} {}", O::KIND, name),
        None => format!("Created {} {}", O::KIND, name),
    };

    O::put(&client, &name, current.as_ref(), &desired).await?;
    info!(engine_name = %name, "{}", note);
    ctx.publish(obj, EventType::Normal, reasons::API_UPDATED, actions::APPLY, note)
        .await;
    outcome.written = Some(desired);
    Ok(ReconcileResult::requeue_after(REQUEUE_STEADY))
}

async fn write_status<O: EngineObject>(
    obj: &O,
    ctx: &Context,
    result: &Result<ReconcileResult, Error>,
    outcome: &Outcome<O::Payload>,
) -> Result<(), Error> {
    if !ctx.options.update_status {
        return Ok(());
    }
    let reason = match result {
        Err(e) => Some(e.to_string()),
        Ok(_) => outcome.reason.clone(),
    };
    let state = derive_state(
        result.is_err(),
        result.as_ref().ok().and_then(|r| r.requeue_after),
        reason.as_deref(),
    );

    let namespace = obj.namespace().unwrap_or_default();
    let written = ctx
        .k8s
        .update_status::<O, _>(&namespace, &obj.name_any(), |fresh| {
            let status = fresh.engine_status_mut();
            if state.is_some() {
                status.state = state;
            }
            status.reason = reason.clone();
            status.managed_cluster = outcome.managed_cluster.clone();
            status.existing = outcome.existing;
            status.engine_name = outcome.engine_name.clone();
            if let Some(desired) = &outcome.written {
                fresh.record_write(desired);
            }
        })
        .await;

    if let Err(e) = written {
        error!(error = %e, "failed to write status");
        ctx.publish(
            obj,
            EventType::Warning,
            reasons::STATUS_UPDATE_ERROR,
            actions::UPDATE_STATUS,
            e.to_string(),
        )
        .await;
        return Err(e);
    }
    Ok(())
}

/// Step nine: remove what the operator created, then release the resource
async fn cleanup<O: EngineObject>(obj: &O, ctx: &Context) -> Result<ReconcileResult, Error> {
    if !has_finalizer(obj) {
        return Ok(ReconcileResult::done());
    }
    let status = obj.engine_status();
    if status.and_then(|s| s.existing) == Some(false) {
        let bound = status.and_then(|s| s.managed_cluster.as_deref());
        if let Some(client) = owning_client(obj, obj.opensearch_ref(), bound, ctx).await? {
            let name = status
                .and_then(|s| s.engine_name.clone())
                .unwrap_or_else(|| obj.engine_name());
            if obj.remove(&client, &name).await? {
                info!(engine_name = %name, "removed engine object");
                ctx.publish(
                    obj,
                    EventType::Normal,
                    reasons::API_UPDATED,
                    actions::DELETE,
                    format!("Deleted {} {}", O::KIND, name),
                )
                .await;
            } else {
                debug!(engine_name = %name, "engine object already gone");
            }
        }
    } else {
        debug!("engine object not created by the operator, leaving it");
    }
    release_finalizer(obj, ctx).await?;
    Ok(ReconcileResult::done())
}

/// Decide how to retry a failed reconcile
pub fn error_policy<K: ResourceExt>(obj: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    match error.requeue_after() {
        Some(delay) => {
            warn!(name = %obj.name_any(), %error, "reconcile failed, retrying");
            Action::requeue(delay)
        }
        None => {
            error!(name = %obj.name_any(), %error, "reconcile failed, waiting for a spec change");
            Action::await_change()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cluster, index_template, role, running, Harness, CLUSTER_UID, NAMESPACE};
    use opensearch_client::Method;
    use opensearch_common::crd::{OpensearchIndexTemplate, OpensearchRole, ResourceState};
    use opensearch_common::reconcile::ReconcilerOptions;
    use opensearch_common::store::Propagation;
    use rstest::rstest;
    use serde_json::json;

    const ROLE_ROUTE: &str = "/_plugins/_security/api/roles/readers";

    fn status(role: &OpensearchRole) -> EngineObjectStatus {
        role.status.clone().expect("status should be written")
    }

    #[tokio::test]
    async fn creates_object_and_records_binding() {
        let h = Harness::running().await;
        h.store.insert(&role("readers")).await;

        let action = h
            .reconcile::<OpensearchRole>("readers")
            .await
            .expect("reconcile should succeed");

        assert_eq!(action, Action::requeue(REQUEUE_STEADY));
        assert_eq!(h.engine.count(Method::Put, ROLE_ROUTE).await, 1);
        let stored = h.get::<OpensearchRole>("readers").await;
        assert!(has_finalizer(&stored));
        let status = status(&stored);
        assert_eq!(status.state, Some(ResourceState::Created));
        assert_eq!(status.managed_cluster.as_deref(), Some(CLUSTER_UID));
        assert_eq!(status.existing, Some(false));
        assert_eq!(status.engine_name.as_deref(), Some("readers"));
        assert!(h.events.has_reason(reasons::API_UPDATED).await);
    }

    #[tokio::test]
    async fn converged_object_is_left_alone() {
        let h = Harness::running().await;
        h.store.insert(&role("readers")).await;
        h.reconcile::<OpensearchRole>("readers")
            .await
            .expect("first reconcile");
        h.engine.clear_requests().await;
        let writes = h.store.write_count().await;

        h.reconcile::<OpensearchRole>("readers")
            .await
            .expect("second reconcile");

        assert!(h.engine.writes().await.is_empty());
        assert_eq!(h.store.write_count().await, writes);
    }

    #[tokio::test]
    async fn object_that_predates_the_resource_is_never_written() {
        let h = Harness::running().await;
        h.engine
            .seed(ROLE_ROUTE, json!({"cluster_permissions": ["cluster_all"]}))
            .await;
        h.store.insert(&role("readers")).await;

        h.reconcile::<OpensearchRole>("readers")
            .await
            .expect("reconcile should succeed");
        let stored = h.get::<OpensearchRole>("readers").await;
        let status = status(&stored);
        assert_eq!(status.state, Some(ResourceState::Ignored));
        assert_eq!(status.existing, Some(true));
        assert_eq!(status.reason.as_deref(), Some("Role already exists"));
        assert!(h.events.has_reason(reasons::ALREADY_EXISTS).await);

        h.delete::<OpensearchRole>("readers").await;
        h.reconcile::<OpensearchRole>("readers")
            .await
            .expect("cleanup should succeed");

        assert!(h.engine.writes().await.is_empty());
        assert!(h.engine.document(ROLE_ROUTE).await.is_some());
        assert!(h.store.fetch::<OpensearchRole>(NAMESPACE, "readers").await.is_none());
    }

    #[tokio::test]
    async fn replaced_cluster_is_refused() {
        let h = Harness::running().await;
        h.store.insert(&role("readers")).await;
        h.reconcile::<OpensearchRole>("readers")
            .await
            .expect("first reconcile");

        let mut replacement = running(cluster());
        replacement.metadata.uid = Some("other-uid".to_string());
        h.store.insert(&replacement).await;
        h.engine.clear_requests().await;

        let err = h
            .reconcile::<OpensearchRole>("readers")
            .await
            .expect_err("a different cluster must be refused");

        assert!(matches!(err, Error::RefMismatch { .. }));
        assert!(h.engine.requests().await.is_empty());
        let status = status(&h.get::<OpensearchRole>("readers").await);
        assert_eq!(status.state, Some(ResourceState::Error));
        assert_eq!(status.managed_cluster.as_deref(), Some(CLUSTER_UID));
        assert!(h.events.has_reason(reasons::REF_MISMATCH).await);
    }

    #[tokio::test]
    async fn renaming_a_created_object_fails_without_writing() {
        let h = Harness::running().await;
        let mut template = index_template("logs");
        template.spec.name = Some("logs-v1".to_string());
        h.store.insert(&template).await;
        h.reconcile::<OpensearchIndexTemplate>("logs")
            .await
            .expect("first reconcile");

        h.store
            .modify::<OpensearchIndexTemplate>(NAMESPACE, "logs", |t| {
                t.spec.name = Some("logs-v2".to_string());
            })
            .await;
        h.engine.clear_requests().await;

        let err = h
            .reconcile::<OpensearchIndexTemplate>("logs")
            .await
            .expect_err("rename must fail");

        assert!(matches!(err, Error::NameMismatch { .. }));
        assert!(h.engine.writes().await.is_empty());
        let stored = h.get::<OpensearchIndexTemplate>("logs").await;
        let status = stored.status.expect("status written");
        assert_eq!(status.state, Some(ResourceState::Error));
        assert_eq!(status.engine_name.as_deref(), Some("logs-v1"));
        assert!(h.events.has_reason(reasons::NAME_MISMATCH).await);
    }

    #[rstest]
    #[case::missing(None)]
    #[case::not_running(Some(cluster()))]
    #[tokio::test]
    async fn waits_for_a_running_cluster(#[case] present: Option<opensearch_common::crd::OpenSearchCluster>) {
        let h = Harness::new();
        if let Some(cluster) = &present {
            h.store.insert(cluster).await;
        }
        h.store.insert(&role("readers")).await;

        let action = h
            .reconcile::<OpensearchRole>("readers")
            .await
            .expect("waiting is not an error");

        assert_eq!(action, Action::requeue(REQUEUE_PENDING));
        assert!(h.engine.requests().await.is_empty());
        let status = status(&h.get::<OpensearchRole>("readers").await);
        assert_eq!(status.state, Some(ResourceState::Pending));
        assert_eq!(status.existing, None);
        assert_eq!(
            status.managed_cluster.as_deref(),
            present.as_ref().map(|_| CLUSTER_UID)
        );
        assert!(h.events.has_reason(reasons::PENDING).await);
    }

    #[tokio::test]
    async fn engine_rejection_marks_the_resource_failed() {
        let h = Harness::running().await;
        h.store.insert(&role("readers")).await;
        h.engine.fail_next(400, "bad role").await;

        let err = h
            .reconcile::<OpensearchRole>("readers")
            .await
            .expect_err("engine rejection should surface");

        assert!(matches!(err, Error::Api { status: 400, .. }));
        let status = status(&h.get::<OpensearchRole>("readers").await);
        assert_eq!(status.state, Some(ResourceState::Error));
        assert!(h.events.has_reason(reasons::API_ERROR).await);
    }

    #[tokio::test]
    async fn deletion_removes_created_object() {
        let h = Harness::running().await;
        h.store.insert(&role("readers")).await;
        h.reconcile::<OpensearchRole>("readers")
            .await
            .expect("reconcile");

        h.delete::<OpensearchRole>("readers").await;
        let action = h
            .reconcile::<OpensearchRole>("readers")
            .await
            .expect("cleanup");

        assert_eq!(action, Action::await_change());
        assert_eq!(h.engine.count(Method::Delete, ROLE_ROUTE).await, 1);
        assert!(h.engine.document(ROLE_ROUTE).await.is_none());
        assert!(h.store.fetch::<OpensearchRole>(NAMESPACE, "readers").await.is_none());
    }

    #[tokio::test]
    async fn deletion_skips_the_engine_once_the_cluster_is_gone() {
        let h = Harness::running().await;
        h.store.insert(&role("readers")).await;
        h.reconcile::<OpensearchRole>("readers")
            .await
            .expect("reconcile");
        h.ctx
            .k8s
            .delete::<opensearch_common::crd::OpenSearchCluster>(NAMESPACE, "logs", Propagation::Background)
            .await
            .expect("cluster delete");
        h.engine.clear_requests().await;

        h.delete::<OpensearchRole>("readers").await;
        h.reconcile::<OpensearchRole>("readers")
            .await
            .expect("cleanup");

        assert!(h.engine.requests().await.is_empty());
        assert!(h.store.fetch::<OpensearchRole>(NAMESPACE, "readers").await.is_none());
    }

    #[tokio::test]
    async fn status_is_left_untouched_when_disabled() {
        let h = Harness::running().await;
        let ctx = Context::from_parts(
            h.ctx.k8s.clone(),
            h.events.clone(),
            Default::default(),
            ReconcilerOptions::default()
                .with_transport(h.engine.clone())
                .without_status_update(),
        );
        h.store.insert(&role("readers")).await;

        reconcile(Arc::new(h.get::<OpensearchRole>("readers").await), Arc::new(ctx))
            .await
            .expect("reconcile");

        assert!(h.get::<OpensearchRole>("readers").await.status.is_none());
        assert_eq!(h.engine.count(Method::Put, ROLE_ROUTE).await, 1);
    }

    #[test]
    fn failures_map_to_event_reasons() {
        let mismatch = Error::RefMismatch {
            resource: "r".to_string(),
            expected: "a".to_string(),
            found: "b".to_string(),
        };
        assert_eq!(failure_reason(&mismatch), reasons::REF_MISMATCH);
        assert_eq!(failure_reason(&Error::internal("boom")), reasons::API_ERROR);
    }
}
