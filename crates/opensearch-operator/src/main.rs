//! OpenSearch Operator - Kubernetes lifecycle management for OpenSearch clusters

use std::sync::Arc;

use clap::Parser;

use opensearch_common::config::OperatorConfig;
use opensearch_common::kube_utils::create_client;
use opensearch_common::telemetry::{init_telemetry, TelemetryConfig};
use opensearch_operator::controller_runner::{build_cluster_controllers, build_resource_controllers};
use opensearch_operator::startup::{crd_manifests, ensure_crds_installed};

/// OpenSearch operator - CRD-driven management of OpenSearch clusters and their contents
#[derive(Parser, Debug)]
#[command(name = "opensearch-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(flatten)]
    telemetry: TelemetryConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    init_telemetry(&cli.telemetry)
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {}", e))?;

    run_controller(Arc::new(cli.config), &cli.telemetry).await
}

async fn run_controller(
    config: Arc<OperatorConfig>,
    telemetry: &TelemetryConfig,
) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        operator_namespace = ?telemetry.operator_namespace,
        log_format = ?telemetry.log_format,
        watch_namespace = ?config.watch_namespace,
        workers = config.reconcile_workers,
        parallel_recovery = config.parallel_recovery_enabled,
        "Starting OpenSearch operator"
    );

    let client = create_client()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    tracing::info!("Starting controllers:");
    let mut controllers = build_cluster_controllers(client.clone(), config.clone());
    controllers.extend(build_resource_controllers(client, config));

    futures::future::join_all(controllers).await;
    tracing::info!("Shutting down");
    Ok(())
}
