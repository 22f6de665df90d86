//! Engine configuration
//!
//! Merges the security plugin defaults with user-supplied opensearch.yml
//! keys and allocates the writable emptyDir overlays (config, logs and,
//! when plugins are requested, plugins) mounted into every node. The
//! config map itself is written by the nodes stage once TLS settings are in.

use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, Volume, VolumeMount};
use kube::runtime::events::EventType;
use serde_yaml::Value;
use tracing::debug;

use opensearch_common::crd::OpenSearchCluster;
use opensearch_common::events::{actions, reasons};
use opensearch_common::reconcile::ReconcileResult;
use opensearch_common::Error;

use crate::controller::Context;
use crate::setup::{yaml_list, NodeSetup, WritableDir, CONFIG_DIR, LOGS_DIR, PLUGINS_DIR};

/// System indices protected by the security plugin
pub const SYSTEM_INDICES: &[&str] = &[
    ".opendistro-alerting-config",
    ".opendistro-alerting-alert*",
    ".opendistro-anomaly-results*",
    ".opendistro-anomaly-detector*",
    ".opendistro-anomaly-checkpoints",
    ".opendistro-anomaly-detection-state",
    ".opendistro-reports-*",
    ".opendistro-notifications-*",
    ".opendistro-notebooks",
    ".opensearch-observability",
    ".opendistro-asynchronous-search-response*",
    ".replication-metadata-store",
];

/// Security plugin keys every node carries
pub fn security_defaults() -> Vec<(&'static str, Value)> {
    vec![
        ("plugins.security.audit.type", Value::from("internal_opensearch")),
        ("plugins.security.allow_default_init_securityindex", Value::Bool(true)),
        ("plugins.security.enable_snapshot_restore_privilege", Value::Bool(true)),
        (
            "plugins.security.check_snapshot_restore_write_privileges",
            Value::Bool(true),
        ),
        (
            "plugins.security.restapi.roles_enabled",
            yaml_list(&["all_access", "security_rest_api_access"]),
        ),
        ("plugins.security.system_indices.enabled", Value::Bool(true)),
        (
            "plugins.security.system_indices.indices",
            yaml_list(SYSTEM_INDICES),
        ),
    ]
}

fn empty_dir(name: &str, path: &str) -> (Volume, VolumeMount) {
    (
        Volume {
            name: name.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        VolumeMount {
            name: name.to_string(),
            mount_path: path.to_string(),
            ..Default::default()
        },
    )
}

/// Collect settings and writable volumes for the node pods
pub async fn reconcile(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    setup: &mut NodeSetup,
) -> Result<ReconcileResult, Error> {
    for (key, value) in security_defaults() {
        setup.set(key, value);
    }

    for (key, value) in &cluster.spec.general.additional_config {
        if let Some(previous) = setup.set_yaml(key.clone(), value) {
            if previous != setup.settings[key] {
                let previous = serde_yaml::to_string(&previous).unwrap_or_default();
                ctx.publish(
                    cluster,
                    EventType::Warning,
                    reasons::CONFIG_DUPLICATE_KEY,
                    actions::RECONCILE,
                    format!(
                        "additionalConfig overrides {} ({} -> {})",
                        key,
                        previous.trim_end(),
                        value
                    ),
                )
                .await;
            }
        }
    }

    let (volume, mount) = empty_dir("writable-config", CONFIG_DIR);
    setup.add_volume(volume, mount);
    setup.writable_dirs.push(WritableDir {
        volume: "writable-config".to_string(),
        source: CONFIG_DIR.to_string(),
    });

    let (volume, mount) = empty_dir("logs", LOGS_DIR);
    setup.add_volume(volume, mount);

    if !cluster.spec.general.plugins_list.is_empty() {
        let (volume, mount) = empty_dir("writable-plugins", PLUGINS_DIR);
        setup.add_volume(volume, mount);
        setup.writable_dirs.push(WritableDir {
            volume: "writable-plugins".to_string(),
            source: PLUGINS_DIR.to_string(),
        });
        setup.plugins = cluster.spec.general.plugins_list.clone();
    }

    debug!(settings = setup.settings.len(), "collected engine settings");
    Ok(ReconcileResult::done())
}
