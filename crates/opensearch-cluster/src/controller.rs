//! OpenSearchCluster controller implementation
//!
//! A reconcile drives every derived object of a cluster towards its spec by
//! running the stages in [`crate::stages`] in order. Each stage returns a
//! [`ReconcileResult`]; the shortest requested delay wins. Errors abort the
//! remaining stages and are handed to [`error_policy`].

use std::sync::Arc;
use std::time::Instant;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use opensearch_client::OpenSearchClient;
use opensearch_common::config::OperatorConfig;
use opensearch_common::crd::{ClusterStatus, OpenSearchCluster};
use opensearch_common::engine::EngineConnector;
use opensearch_common::events::{EventPublisher, KubeEventPublisher};
use opensearch_common::k8s::K8s;
use opensearch_common::kube_utils::is_deleting;
use opensearch_common::metrics;
use opensearch_common::reconcile::{ReconcileResult, ReconcilerOptions, REQUEUE_STEADY};
use opensearch_common::store::KubeObjectStore;
use opensearch_common::Error;

use crate::setup::NodeSetup;
use crate::stages;

/// Name reported on events published by this controller
pub const CONTROLLER_NAME: &str = "opensearch-cluster-controller";

/// Controller context shared by every reconcile
pub struct Context {
    /// Typed orchestrator access
    pub k8s: K8s,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Process-wide configuration
    pub config: Arc<OperatorConfig>,
    /// Builds engine clients for clusters
    pub engine: EngineConnector,
    /// Test knobs
    pub options: ReconcilerOptions,
}

impl Context {
    /// Production context backed by the Kubernetes API
    pub fn new(client: Client, config: Arc<OperatorConfig>) -> Self {
        let k8s = K8s::new(Arc::new(KubeObjectStore::new(client.clone())));
        let events = Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME));
        Self::from_parts(k8s, events, config, ReconcilerOptions::default())
    }

    /// Context assembled from explicit parts
    ///
    /// The engine transport in `options`, when set, replaces HTTPS for
    /// every engine call.
    pub fn from_parts(
        k8s: K8s,
        events: Arc<dyn EventPublisher>,
        config: Arc<OperatorConfig>,
        options: ReconcilerOptions,
    ) -> Self {
        let engine = EngineConnector::new(config.clone(), options.transport.clone());
        Self {
            k8s,
            events,
            config,
            engine,
            options,
        }
    }

    /// Engine client for the cluster
    pub async fn client(&self, cluster: &OpenSearchCluster) -> Result<OpenSearchClient, Error> {
        self.engine.connect(&self.k8s, cluster).await
    }

    /// Publish an event on the cluster
    pub async fn publish(
        &self,
        cluster: &OpenSearchCluster,
        type_: EventType,
        reason: &str,
        action: &str,
        note: impl Into<String>,
    ) {
        self.events
            .publish(
                &cluster.object_ref(&()),
                type_,
                reason,
                action,
                Some(note.into()),
            )
            .await;
    }

    /// Mutate the cluster status, retrying on conflict
    pub async fn update_status<F>(&self, cluster: &OpenSearchCluster, mutate: F) -> Result<(), Error>
    where
        F: Fn(&mut ClusterStatus) + Send + Sync,
    {
        if !self.options.update_status {
            return Ok(());
        }
        let namespace = cluster.namespace().unwrap_or_default();
        self.k8s
            .update_status::<OpenSearchCluster, _>(&namespace, &cluster.name_any(), |c| {
                mutate(c.status.get_or_insert_with(ClusterStatus::default))
            })
            .await?;
        Ok(())
    }
}

/// Reconcile an OpenSearchCluster
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<OpenSearchCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start = Instant::now();
    let result = run(&cluster, &ctx).await;
    metrics::record_reconcile(
        "OpenSearchCluster",
        start.elapsed().as_secs_f64(),
        result.as_ref().err().map(Error::is_retryable),
    );
    result.map(ReconcileResult::into_action)
}

async fn run(cluster: &OpenSearchCluster, ctx: &Context) -> Result<ReconcileResult, Error> {
    if is_deleting(cluster) {
        debug!("cluster is being deleted, owner references clean up");
        return Ok(ReconcileResult::done());
    }
    info!("reconciling cluster");

    let mut setup = NodeSetup::default();
    let mut result = ReconcileResult::requeue_after(REQUEUE_STEADY);

    result.merge(stages::config::reconcile(cluster, ctx, &mut setup).await?);
    result.merge(stages::tls::reconcile(cluster, ctx, &mut setup).await?);
    result.merge(stages::security::reconcile(cluster, ctx).await?);
    result.merge(stages::nodes::reconcile(cluster, ctx, &setup).await?);
    result.merge(stages::scaler::reconcile(cluster, ctx).await?);
    result.merge(stages::restart::reconcile(cluster, ctx).await?);
    result.merge(stages::upgrade::reconcile(cluster, ctx).await?);
    result.merge(stages::snapshots::reconcile(cluster, ctx).await?);
    result.merge(stages::dashboards::reconcile(cluster, ctx, &setup).await?);
    result.merge(stages::status::reconcile(cluster, ctx).await?);

    Ok(result)
}

/// Decide how to retry a failed reconcile
pub fn error_policy(cluster: Arc<OpenSearchCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    match error.requeue_after() {
        Some(delay) if error.is_pending() => {
            debug!(cluster = %cluster.name_any(), %error, "waiting on a prerequisite");
            Action::requeue(delay)
        }
        Some(delay) => {
            warn!(cluster = %cluster.name_any(), %error, "reconciliation failed, retrying");
            Action::requeue(delay)
        }
        None => {
            error!(
                cluster = %cluster.name_any(),
                %error,
                "reconciliation failed, waiting for a spec change"
            );
            Action::await_change()
        }
    }
}
