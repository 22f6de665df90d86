//! Controller runner - builds controller futures for each watched kind
//!
//! Each `build_*` function returns a Vec of boxed futures that can be composed
//! by the caller. Every reconcile runs under the configured deadline and
//! watches are scoped to the configured namespace when one is set.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::{self, Action};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};

use opensearch_common::config::OperatorConfig;
use opensearch_common::crd::{
    OpenSearchCluster, OpenSearchISMPolicy, OpensearchActionGroup, OpensearchComponentTemplate,
    OpensearchIndexTemplate, OpensearchRole, OpensearchSearchTemplate, OpensearchSnapshotPolicy,
    OpensearchTenant, OpensearchUser, OpensearchUserRoleBinding,
};
use opensearch_common::reconcile::REQUEUE_PENDING;
use opensearch_common::Error;
use opensearch_resources::{binding, EngineObject};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller loop ready to be awaited
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

fn controller_config(config: &OperatorConfig) -> controller::Config {
    controller::Config::default().concurrency(config.reconcile_workers.max(1))
}

/// Api for a namespaced kind, limited to the watched namespace if one is set
pub fn scoped_api<K>(client: Client, config: &OperatorConfig) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match config.watch_namespace.as_deref() {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

/// Run a reconcile under a deadline
///
/// An expired reconcile is dropped at its next await point and the object
/// is requeued; no status is written for the abandoned attempt.
pub async fn with_deadline<F>(
    kind: &'static str,
    name: String,
    deadline: Duration,
    reconcile: F,
) -> Result<Action, Error>
where
    F: Future<Output = Result<Action, Error>>,
{
    match tokio::time::timeout(deadline, reconcile).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(kind, %name, ?deadline, "reconcile deadline exceeded, requeueing");
            Ok(Action::requeue(REQUEUE_PENDING))
        }
    }
}

/// Build the OpenSearchCluster controller
///
/// Changes to the stateful sets, jobs and dashboards deployments the
/// cluster owns trigger a reconcile of the owning cluster.
pub fn build_cluster_controllers(
    client: Client,
    config: Arc<OperatorConfig>,
) -> Vec<ControllerFuture> {
    let deadline = config.reconcile_timeout();
    let ctx = Arc::new(opensearch_cluster::Context::new(client.clone(), config.clone()));
    let clusters: Api<OpenSearchCluster> = scoped_api(client.clone(), &config);

    tracing::info!("- OpenSearchCluster controller");

    vec![Box::pin(
        Controller::new(clusters, watcher_config())
            .owns(scoped_api::<StatefulSet>(client.clone(), &config), watcher_config())
            .owns(scoped_api::<Job>(client.clone(), &config), watcher_config())
            .owns(scoped_api::<Deployment>(client, &config), watcher_config())
            .with_config(controller_config(&config))
            .shutdown_on_signal()
            .run(
                move |cluster: Arc<OpenSearchCluster>, ctx| {
                    let name = cluster.name_any();
                    with_deadline(
                        "OpenSearchCluster",
                        name,
                        deadline,
                        opensearch_cluster::reconcile(cluster, ctx),
                    )
                },
                opensearch_cluster::error_policy,
                ctx,
            )
            .for_each(log_reconcile_result("Cluster")),
    )]
}

/// Build the controllers for every in-engine object kind and role bindings
pub fn build_resource_controllers(
    client: Client,
    config: Arc<OperatorConfig>,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(opensearch_resources::Context::new(client.clone(), config.clone()));

    let mut controllers = vec![
        engine_object_controller::<OpensearchUser>(&client, &ctx, &config),
        engine_object_controller::<OpensearchRole>(&client, &ctx, &config),
        engine_object_controller::<OpensearchTenant>(&client, &ctx, &config),
        engine_object_controller::<OpensearchActionGroup>(&client, &ctx, &config),
        engine_object_controller::<OpensearchIndexTemplate>(&client, &ctx, &config),
        engine_object_controller::<OpensearchComponentTemplate>(&client, &ctx, &config),
        engine_object_controller::<OpensearchSearchTemplate>(&client, &ctx, &config),
        engine_object_controller::<OpenSearchISMPolicy>(&client, &ctx, &config),
        engine_object_controller::<OpensearchSnapshotPolicy>(&client, &ctx, &config),
    ];

    tracing::info!("- OpensearchUserRoleBinding controller");
    let deadline = config.reconcile_timeout();
    let bindings: Api<OpensearchUserRoleBinding> = scoped_api(client, &config);
    controllers.push(Box::pin(
        Controller::new(bindings, watcher_config())
            .with_config(controller_config(&config))
            .shutdown_on_signal()
            .run(
                move |obj: Arc<OpensearchUserRoleBinding>, ctx| {
                    let name = obj.name_any();
                    with_deadline("UserRoleBinding", name, deadline, binding::reconcile(obj, ctx))
                },
                opensearch_resources::error_policy,
                ctx,
            )
            .for_each(log_reconcile_result("UserRoleBinding")),
    ));

    controllers
}

fn engine_object_controller<K>(
    client: &Client,
    ctx: &Arc<opensearch_resources::Context>,
    config: &OperatorConfig,
) -> ControllerFuture
where
    K: EngineObject + Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    tracing::info!("- {} controller", K::KIND);
    let deadline = config.reconcile_timeout();
    let api: Api<K> = scoped_api(client.clone(), config);

    Box::pin(
        Controller::new(api, watcher_config())
            .with_config(controller_config(config))
            .shutdown_on_signal()
            .run(
                move |obj: Arc<K>, ctx| {
                    let name = obj.name_any();
                    with_deadline(
                        K::KIND,
                        name,
                        deadline,
                        opensearch_resources::reconcile::<K>(obj, ctx),
                    )
                },
                opensearch_resources::error_policy::<K>,
                ctx.clone(),
            )
            .for_each(log_reconcile_result(K::KIND)),
    )
}

fn log_reconcile_result<T: Debug, E: Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opensearch_common::reconcile::REQUEUE_STEADY;

    #[tokio::test(start_paused = true)]
    async fn expired_reconcile_is_requeued() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(Action::requeue(REQUEUE_STEADY))
        };
        let action = with_deadline("ISMPolicy", "rollover".into(), Duration::from_secs(5), slow)
            .await
            .expect("deadline is not an error");
        assert_eq!(action, Action::requeue(REQUEUE_PENDING));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_within_deadline_keeps_its_outcome() {
        let quick = async { Ok(Action::requeue(REQUEUE_STEADY)) };
        let action = with_deadline("Role", "readers".into(), Duration::from_secs(5), quick)
            .await
            .expect("reconcile succeeds");
        assert_eq!(action, Action::requeue(REQUEUE_STEADY));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_error_passes_through() {
        let failing = async { Err(Error::validation("bad input")) };
        let err = with_deadline("User", "alice".into(), Duration::from_secs(5), failing)
            .await
            .expect_err("error propagates");
        assert!(matches!(err, Error::Validation { .. }));
    }
}
