//! Security config applier
//!
//! Security plugin documents (users, roles, mappings, ...) are pushed into
//! the engine with its admin tool, run from a one-shot Job authenticated by
//! the admin client certificate. The Job carries a checksum of the input
//! documents; it is replaced only when that checksum changes.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use opensearch_common::crd::{OpenSearchCluster, TRANSPORT_PORT};
use opensearch_common::events::{actions, reasons};
use opensearch_common::kube_utils::{cluster_labels, owned_meta, sha1_hex, JOB_LABEL};
use opensearch_common::reconcile::ReconcileResult;
use opensearch_common::store::Propagation;
use opensearch_common::Error;

use crate::builders::{major_version, secret_volume};
use crate::controller::Context;
use crate::names;
use crate::stages::tls::{generates_node_certs, secret_data};

/// Job annotation carrying the checksum of the applied documents
pub const CHECKSUM_ANNOTATION: &str = "securityconfig/checksum";

const CERTS_DIR: &str = "/certs";
const CONFIG_MOUNT: &str = "/securityconfig";
const ADMIN_TOOL: &str = "/usr/share/opensearch/plugins/opensearch-security/tools/securityadmin.sh";
const MAX_ATTEMPTS: u32 = 20;
const RETRY_SLEEP_SECS: u32 = 20;

/// Recognised document names and the admin tool's type token for each
const DOCUMENTS: &[(&str, &str)] = &[
    ("action_groups.yml", "actiongroups"),
    ("allowlist.yml", "allowlist"),
    ("audit.yml", "audit"),
    ("config.yml", "config"),
    ("internal_users.yml", "internalusers"),
    ("nodes_dn.yml", "nodesdn"),
    ("roles.yml", "roles"),
    ("roles_mapping.yml", "rolesmapping"),
    ("tenants.yml", "tenants"),
    ("whitelist.yml", "whitelist"),
];

/// Admin tool type token of a document, None when unrecognised
pub fn document_type(file: &str) -> Option<&'static str> {
    DOCUMENTS
        .iter()
        .find(|(name, _)| *name == file)
        .map(|(_, token)| *token)
}

/// SHA-1 over every key followed by its value, keys in sorted order
pub fn checksum(documents: &BTreeMap<String, String>) -> String {
    let mut bytes = Vec::new();
    for (key, value) in documents {
        bytes.extend_from_slice(key.as_bytes());
        bytes.extend_from_slice(value.as_bytes());
    }
    sha1_hex(bytes)
}

/// Secret holding the admin client certificate, None for demo certificates
pub fn admin_secret(cluster: &OpenSearchCluster) -> Option<String> {
    cluster
        .security_config()
        .and_then(|c| c.admin_secret.as_ref())
        .map(|s| s.name.clone())
        .or_else(|| {
            generates_node_certs(cluster).then(|| names::admin_cert_secret(&cluster.name_any()))
        })
}

/// Where the admin tool reaches the engine and finds the bundled documents
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminTarget {
    /// Service host name
    pub host: String,
    /// HTTP port used for the reachability check
    pub http_port: i32,
    /// Port the admin tool connects to
    pub admin_port: i32,
    /// Directory with the documents shipped in the image
    pub default_dir: &'static str,
}

impl AdminTarget {
    /// Endpoints for the given engine version
    pub fn for_version(host: String, http_port: i32, version: &str) -> Self {
        if major_version(version) < 2 {
            Self {
                host,
                http_port,
                admin_port: TRANSPORT_PORT,
                default_dir: "/usr/share/opensearch/plugins/opensearch-security/securityconfig",
            }
        } else {
            Self {
                host,
                http_port,
                admin_port: http_port,
                default_dir: "/usr/share/opensearch/config/opensearch-security",
            }
        }
    }

    fn invocation(&self, source: &str) -> String {
        format!(
            "count=0;\nuntil {tool} -cacert {certs}/ca.crt -cert {certs}/tls.crt -key {certs}/tls.key {source} -icl -nhnv -h {host} -p {port} || (( count++ >= {max} )); do sleep {sleep}; done;\n",
            tool = ADMIN_TOOL,
            certs = CERTS_DIR,
            source = source,
            host = self.host,
            port = self.admin_port,
            max = MAX_ATTEMPTS,
            sleep = RETRY_SLEEP_SECS,
        )
    }

    /// Shell script waiting for the cluster, then applying each document
    ///
    /// `documents` must be sorted; with none, the image's bundled directory
    /// is applied instead.
    pub fn script(&self, documents: &[(String, &'static str)]) -> String {
        let mut script = format!(
            "until curl -k --silent https://{}:{}; do\necho 'Waiting to connect to the cluster'; sleep {};\ndone;\n",
            self.host, self.http_port, RETRY_SLEEP_SECS
        );
        if documents.is_empty() {
            script.push_str(&self.invocation(&format!("-cd {}", self.default_dir)));
        }
        for (file, token) in documents {
            script.push_str(&self.invocation(&format!(
                "-f {}/{} -t {}",
                CONFIG_MOUNT, file, token
            )));
        }
        script
    }
}

fn applier_job(
    cluster: &OpenSearchCluster,
    admin: &str,
    config_secret: Option<&str>,
    script: String,
    checksum: &str,
) -> Result<Job, Error> {
    let name = cluster.name_any();
    let job_name = names::security_job(&name);
    let version = cluster
        .status_version()
        .unwrap_or(&cluster.spec.general.version)
        .to_string();

    let mut labels = cluster_labels(&name);
    labels.insert(JOB_LABEL.to_string(), job_name.clone());
    let mut metadata = owned_meta(cluster, &job_name, labels.clone())?;
    metadata.annotations = Some(BTreeMap::from([(
        CHECKSUM_ANNOTATION.to_string(),
        checksum.to_string(),
    )]));

    let (cert_volume, cert_mount) = secret_volume("admin-cert", admin, CERTS_DIR);
    let mut volumes = vec![cert_volume];
    let mut mounts = vec![cert_mount];
    if let Some(secret_name) = config_secret {
        let (volume, mount) = secret_volume("security-config", secret_name, CONFIG_MOUNT);
        volumes.push(volume);
        mounts.push(mount);
    }

    let resources = cluster
        .security_config()
        .and_then(|c| c.update_job_resources.clone());

    Ok(Job {
        metadata,
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    service_account_name: cluster.spec.general.service_account.clone(),
                    containers: vec![Container {
                        name: "updater".to_string(),
                        image: Some(cluster.image_for(&version)),
                        image_pull_policy: cluster.spec.general.image_pull_policy.clone(),
                        command: Some(vec!["/bin/bash".to_string(), "-c".to_string(), script]),
                        resources,
                        volume_mounts: Some(mounts),
                        ..Default::default()
                    }],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Run the applier Job when the security documents changed
pub async fn reconcile(cluster: &OpenSearchCluster, ctx: &Context) -> Result<ReconcileResult, Error> {
    let Some(admin) = admin_secret(cluster) else {
        debug!("demo certificates in use, security config is not applied");
        return Ok(ReconcileResult::done());
    };
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    let config_secret = cluster
        .security_config()
        .and_then(|c| c.security_config_secret.as_ref())
        .map(|s| s.name.clone());
    let documents = match &config_secret {
        Some(secret_name) => {
            let secret = ctx
                .k8s
                .get::<Secret>(&namespace, secret_name)
                .await?
                .ok_or_else(|| {
                    Error::pending(
                        &name,
                        format!("security config secret {} does not exist", secret_name),
                    )
                })?;
            secret_data(&secret)
        }
        None => BTreeMap::new(),
    };

    let mut applied = Vec::new();
    for (file, contents) in &documents {
        match document_type(file) {
            None => warn!(file = %file, "ignoring unrecognised security config document"),
            Some(_) if contents.trim().is_empty() => {}
            Some(token) => applied.push((file.clone(), token)),
        }
    }

    let checksum = checksum(&documents);
    let job_name = names::security_job(&name);
    if let Some(existing) = ctx.k8s.get::<Job>(&namespace, &job_name).await? {
        if existing.annotations().get(CHECKSUM_ANNOTATION) == Some(&checksum) {
            return Ok(ReconcileResult::done());
        }
        info!(job = %job_name, "security config changed, replacing applier job");
        ctx.k8s
            .delete::<Job>(&namespace, &job_name, Propagation::Background)
            .await?;
    }

    let version = cluster
        .status_version()
        .unwrap_or(&cluster.spec.general.version)
        .to_string();
    let target = AdminTarget::for_version(
        ctx.config
            .service_host(&cluster.spec.general.service_name, &namespace),
        cluster.spec.general.http_port,
        &version,
    );
    let job = applier_job(
        cluster,
        &admin,
        config_secret.as_deref(),
        target.script(&applied),
        &checksum,
    )?;
    ctx.k8s.create(&job).await?;
    ctx.publish(
        cluster,
        EventType::Normal,
        reasons::SECURITY,
        actions::APPLY,
        format!("Applying {} security config documents", applied.len()),
    )
    .await;
    Ok(ReconcileResult::done())
}
