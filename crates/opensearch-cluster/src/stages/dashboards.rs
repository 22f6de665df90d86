//! OpenSearch Dashboards deployment
//!
//! Dashboards run as a plain deployment next to the cluster, configured
//! through a rendered `opensearch_dashboards.yml`. When TLS is requested
//! with generation, the certificate comes from the cluster CA published by
//! the TLS stage. Disabling dashboards deletes everything this stage owns.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    HTTPGetAction, PodSpec, PodTemplateSpec, Probe, SecretKeySelector, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use serde_yaml::Value;
use tracing::debug;

use opensearch_common::crd::{DashboardsConfig, OpenSearchCluster, DEFAULT_REPOSITORY};
use opensearch_common::k8s::DesiredState;
use opensearch_common::kube_utils::{owned_meta, sha1_hex};
use opensearch_common::reconcile::ReconcileResult;
use opensearch_common::store::Propagation;
use opensearch_common::Error;

use crate::builders::{config_map, secret_volume};
use crate::controller::Context;
use crate::names;
use crate::setup::{render_settings, yaml_list, NodeSetup};
use crate::stages::tls;

/// Port dashboards listen on
pub const DASHBOARDS_PORT: i32 = 5601;

const DASHBOARDS_LABEL: &str = "opster.io/opensearch-dashboards";
const CONFIG_FILE: &str = "opensearch_dashboards.yml";
const CONFIG_PATH: &str = "/usr/share/opensearch-dashboards/config/opensearch_dashboards.yml";
const CERTS_PATH: &str = "/usr/share/opensearch-dashboards/certs";
const CHECKSUM_ANNOTATION: &str = "opster.io/dashboards-config";

fn dashboards_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(DASHBOARDS_LABEL.to_string(), cluster.to_string())])
}

fn tls_enabled(config: &DashboardsConfig) -> bool {
    config.tls.as_ref().map(|t| t.enable).unwrap_or(false)
}

/// Image of dashboards at the configured version
pub fn image(cluster: &OpenSearchCluster, config: &DashboardsConfig) -> String {
    if let Some(image) = &config.image {
        return image.clone();
    }
    let repo = cluster
        .spec
        .general
        .default_repo
        .as_deref()
        .unwrap_or(DEFAULT_REPOSITORY);
    format!("{}/opensearch-dashboards:{}", repo, config.version)
}

/// Rendered opensearch_dashboards.yml
pub fn render_config(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    config: &DashboardsConfig,
) -> Result<String, Error> {
    let scheme = if cluster.http_tls().is_some() {
        "https"
    } else {
        "http"
    };
    let host = ctx.config.service_host(
        &cluster.spec.general.service_name,
        &cluster.namespace().unwrap_or_default(),
    );
    let opensearch_url = format!("{}://{}:{}", scheme, host, cluster.spec.general.http_port);
    let mut settings = BTreeMap::from([
        ("server.name".to_string(), Value::from(names::dashboards(&cluster.name_any()))),
        ("server.host".to_string(), Value::from("0.0.0.0")),
        ("opensearch.hosts".to_string(), yaml_list(&[opensearch_url])),
        ("opensearch.ssl.verificationMode".to_string(), Value::from("none")),
    ]);
    if let Some(base_path) = &config.base_path {
        settings.insert("server.basePath".to_string(), Value::from(base_path.as_str()));
        settings.insert("server.rewriteBasePath".to_string(), Value::Bool(true));
    }
    if tls_enabled(config) {
        settings.insert("server.ssl.enabled".to_string(), Value::Bool(true));
        settings.insert(
            "server.ssl.certificate".to_string(),
            Value::from(format!("{}/tls.crt", CERTS_PATH)),
        );
        settings.insert(
            "server.ssl.key".to_string(),
            Value::from(format!("{}/tls.key", CERTS_PATH)),
        );
    }
    if config.opensearch_credentials_secret.is_some() {
        settings.insert(
            "opensearch.username".to_string(),
            Value::from("${OPENSEARCH_USERNAME}"),
        );
        settings.insert(
            "opensearch.password".to_string(),
            Value::from("${OPENSEARCH_PASSWORD}"),
        );
    }
    for (key, value) in &config.additional_config {
        let value = serde_yaml::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.clone()));
        settings.insert(key.clone(), value);
    }
    render_settings("opensearch_dashboards.yml", &settings)
}

fn credential_env(secret: &str, env_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: env_name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Deployment running dashboards with the rendered config and TLS secret
pub fn deployment(
    cluster: &OpenSearchCluster,
    config: &DashboardsConfig,
    rendered: &str,
    tls_secret: Option<&str>,
) -> Result<Deployment, Error> {
    let cluster_name = cluster.name_any();
    let name = names::dashboards(&cluster_name);
    let labels = dashboards_labels(&cluster_name);

    let mut volumes = vec![Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: names::dashboards_config(&cluster_name),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: "config".to_string(),
        mount_path: CONFIG_PATH.to_string(),
        sub_path: Some(CONFIG_FILE.to_string()),
        ..Default::default()
    }];
    if let Some(secret) = tls_secret {
        let (volume, mount) = secret_volume("tls-cert", secret, CERTS_PATH);
        volumes.push(volume);
        mounts.push(mount);
    }

    let env = config
        .opensearch_credentials_secret
        .as_ref()
        .map(|s| {
            vec![
                credential_env(&s.name, "OPENSEARCH_USERNAME", "username"),
                credential_env(&s.name, "OPENSEARCH_PASSWORD", "password"),
            ]
        });
    let scheme = if tls_secret.is_some() { "HTTPS" } else { "HTTP" };
    let probe_path = format!(
        "{}/api/status",
        config.base_path.as_deref().unwrap_or_default()
    );

    let container = Container {
        name: "dashboards".to_string(),
        image: Some(image(cluster, config)),
        image_pull_policy: cluster.spec.general.image_pull_policy.clone(),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: DASHBOARDS_PORT,
            ..Default::default()
        }]),
        env,
        resources: config.resources.clone(),
        volume_mounts: Some(mounts),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some(probe_path),
                port: IntOrString::Int(DASHBOARDS_PORT),
                scheme: Some(scheme.to_string()),
                ..Default::default()
            }),
            period_seconds: Some(20),
            timeout_seconds: Some(5),
            failure_threshold: Some(10),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: owned_meta(cluster, &name, labels.clone())?,
        spec: Some(DeploymentSpec {
            replicas: Some(config.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([(
                        CHECKSUM_ANNOTATION.to_string(),
                        sha1_hex(rendered),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    service_account_name: cluster.spec.general.service_account.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Service in front of the dashboards pods
pub fn service(cluster: &OpenSearchCluster, config: &DashboardsConfig) -> Result<Service, Error> {
    let cluster_name = cluster.name_any();
    let labels = dashboards_labels(&cluster_name);
    Ok(Service {
        metadata: owned_meta(cluster, names::dashboards(&cluster_name), labels.clone())?,
        spec: Some(ServiceSpec {
            type_: Some(
                config
                    .service_type
                    .clone()
                    .unwrap_or_else(|| "ClusterIP".to_string()),
            ),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: DASHBOARDS_PORT,
                target_port: Some(IntOrString::Int(DASHBOARDS_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

async fn remove(cluster: &OpenSearchCluster, ctx: &Context) -> Result<(), Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let removed = ctx
        .k8s
        .delete::<Deployment>(&namespace, &names::dashboards(&name), Propagation::Background)
        .await?;
    ctx.k8s
        .delete::<Service>(&namespace, &names::dashboards(&name), Propagation::Background)
        .await?;
    ctx.k8s
        .delete::<ConfigMap>(&namespace, &names::dashboards_config(&name), Propagation::Background)
        .await?;
    if removed {
        debug!("dashboards disabled, removed deployment");
    }
    Ok(())
}

/// Secret holding the dashboards certificate, issuing it when generated
async fn tls_secret(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    setup: &NodeSetup,
    config: &DashboardsConfig,
) -> Result<Option<String>, Error> {
    let Some(tls_config) = config.tls.as_ref().filter(|t| t.enable) else {
        return Ok(None);
    };
    if !tls_config.generate {
        return match &tls_config.secret {
            Some(secret) => Ok(Some(secret.name.clone())),
            None => Err(Error::validation_for_field(
                cluster.name_any(),
                "spec.dashboards.tls.secret",
                "dashboards TLS without generation needs a secret",
            )),
        };
    }
    let Some(ca) = setup.ca.as_ref() else {
        return Err(Error::pending(cluster.name_any(), "cluster CA not loaded yet"));
    };
    let name = names::dashboards(&cluster.name_any());
    let namespace = cluster.namespace().unwrap_or_default();
    let sans = vec![
        name.clone(),
        format!("{}.{}", name, namespace),
        format!("{}.{}.svc", name, namespace),
        ctx.config.service_host(&name, &namespace),
    ];
    let secret = tls::single_cert(cluster, ctx, ca, "dashboards", &name, sans).await?;
    Ok(Some(secret))
}

/// Keep dashboards in line with the cluster spec
pub async fn reconcile(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    setup: &NodeSetup,
) -> Result<ReconcileResult, Error> {
    let Some(config) = cluster.dashboards() else {
        remove(cluster, ctx).await?;
        return Ok(ReconcileResult::done());
    };

    let secret = tls_secret(cluster, ctx, setup, config).await?;
    let rendered = render_config(cluster, ctx, config)?;
    ctx.k8s
        .reconcile(
            &config_map(
                cluster,
                &names::dashboards_config(&cluster.name_any()),
                CONFIG_FILE,
                rendered.clone(),
            )?,
            DesiredState::Present,
        )
        .await?;
    ctx.k8s
        .reconcile(
            &deployment(cluster, config, &rendered, secret.as_deref())?,
            DesiredState::Present,
        )
        .await?;
    ctx.k8s
        .reconcile(&service(cluster, config)?, DesiredState::Present)
        .await?;
    Ok(ReconcileResult::done())
}
