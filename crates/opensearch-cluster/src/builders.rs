//! Orchestrator objects derived from a cluster
//!
//! Pure functions from the cluster spec (plus the per-reconcile
//! [`NodeSetup`]) to typed objects. Nothing here talks to the API server.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Secret, SecretVolumeSource,
    SecurityContext, Service, ServicePort, ServiceSpec, TCPSocketAction, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::ResourceExt;

use opensearch_common::crd::{NodePool, OpenSearchCluster, TRANSPORT_PORT};
use opensearch_common::kube_utils::{cluster_labels, owned_meta, pool_labels};
use opensearch_common::Error;

use crate::names;
use crate::setup::{NodeSetup, CONFIG_DIR, DATA_DIR};

/// Data volume size when a pool sets none
pub const DEFAULT_DISK_SIZE: &str = "30Gi";
/// Heap settings when a pool sets none
pub const DEFAULT_JAVA_OPTS: &str = "-Xmx512M -Xms512M";
/// Image of the init containers when the cluster sets none
pub const DEFAULT_INIT_IMAGE: &str = "public.ecr.aws/docker/library/busybox:1.36";
/// Engine container name
pub const ENGINE_CONTAINER: &str = "opensearch";
/// Pool component of the bootstrap pod
pub const BOOTSTRAP_POOL: &str = "bootstrap";

const CONFIG_VOLUME: &str = "config";
const DATA_VOLUME: &str = "data";
const CONFIG_FILE: &str = "opensearch.yml";
const ENGINE_UID: i64 = 1000;

/// Major version of a version string; unparsable versions count as current
pub fn major_version(version: &str) -> u64 {
    match semver::Version::parse(version) {
        Ok(v) => v.major,
        Err(_) => version
            .split('.')
            .next()
            .and_then(|m| m.parse().ok())
            .unwrap_or(2),
    }
}

/// Node roles spelled the way the engine version expects
pub fn node_roles(roles: &[String], version: &str) -> Vec<String> {
    let legacy = major_version(version) < 2;
    roles
        .iter()
        .map(|role| match role.as_str() {
            "cluster_manager" if legacy => "master".to_string(),
            "master" if !legacy => "cluster_manager".to_string(),
            other => other.to_string(),
        })
        .collect()
}

/// Size of each data volume of a pool
pub fn disk_size(pool: &NodePool) -> String {
    pool.disk_size
        .clone()
        .unwrap_or_else(|| DEFAULT_DISK_SIZE.to_string())
}

/// Opaque secret owned by the cluster
pub fn secret(
    cluster: &OpenSearchCluster,
    name: &str,
    data: BTreeMap<String, String>,
) -> Result<Secret, Error> {
    Ok(Secret {
        metadata: owned_meta(cluster, name, cluster_labels(&cluster.name_any()))?,
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    })
}

/// Read-only secret volume and its mount
pub fn secret_volume(volume: &str, secret: &str, path: &str) -> (Volume, VolumeMount) {
    (
        Volume {
            name: volume.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        VolumeMount {
            name: volume.to_string(),
            mount_path: path.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
    )
}

/// Config map with a single file
pub fn config_map(
    cluster: &OpenSearchCluster,
    name: &str,
    file: &str,
    contents: String,
) -> Result<ConfigMap, Error> {
    Ok(ConfigMap {
        metadata: owned_meta(cluster, name, cluster_labels(&cluster.name_any()))?,
        data: Some(BTreeMap::from([(file.to_string(), contents)])),
        ..Default::default()
    })
}

/// Config map holding the rendered opensearch.yml
pub fn engine_config(cluster: &OpenSearchCluster, setup: &NodeSetup) -> Result<ConfigMap, Error> {
    config_map(
        cluster,
        &names::config_map(&cluster.name_any()),
        CONFIG_FILE,
        setup.render()?,
    )
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn engine_ports(cluster: &OpenSearchCluster) -> Vec<ServicePort> {
    vec![
        service_port("http", cluster.spec.general.http_port),
        service_port("transport", TRANSPORT_PORT),
    ]
}

/// Client-facing service in front of every node
pub fn cluster_service(cluster: &OpenSearchCluster) -> Result<Service, Error> {
    let name = cluster.name_any();
    let general = &cluster.spec.general;
    Ok(Service {
        metadata: owned_meta(cluster, &general.service_name, cluster_labels(&name))?,
        spec: Some(ServiceSpec {
            type_: Some(
                general
                    .service_type
                    .clone()
                    .unwrap_or_else(|| "ClusterIP".to_string()),
            ),
            selector: Some(cluster_labels(&name)),
            ports: Some(engine_ports(cluster)),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn headless_service(
    cluster: &OpenSearchCluster,
    name: &str,
    labels: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
    publish_not_ready: bool,
) -> Result<Service, Error> {
    Ok(Service {
        metadata: owned_meta(cluster, name, labels)?,
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector),
            ports: Some(engine_ports(cluster)),
            publish_not_ready_addresses: Some(publish_not_ready),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Headless service resolving every cluster-manager eligible pod
///
/// Not-ready pods are published so a forming cluster can find its peers.
pub fn discovery_service(cluster: &OpenSearchCluster) -> Result<Service, Error> {
    let name = cluster.name_any();
    let mut selector = cluster_labels(&name);
    selector.insert(names::MANAGER_LABEL.to_string(), "true".to_string());
    headless_service(
        cluster,
        &names::discovery_service(&name),
        cluster_labels(&name),
        selector,
        true,
    )
}

/// Headless service governing the pods of one pool
pub fn pool_service(cluster: &OpenSearchCluster, pool: &NodePool) -> Result<Service, Error> {
    let name = cluster.name_any();
    let labels = pool_labels(&name, &pool.component);
    headless_service(
        cluster,
        &names::statefulset(&name, &pool.component),
        labels.clone(),
        labels,
        false,
    )
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Engine settings passed through the container environment
struct NodeEnv<'a> {
    version: &'a str,
    roles: &'a [String],
    jvm: Option<&'a str>,
    additional_config: &'a BTreeMap<String, String>,
    extra: &'a [EnvVar],
}

fn engine_env(cluster: &OpenSearchCluster, node: NodeEnv<'_>) -> Vec<EnvVar> {
    let name = cluster.name_any();
    let mut vars = vec![
        env("cluster.name", &name),
        env("network.host", "0.0.0.0"),
        EnvVar {
            name: "node.name".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.name".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        env("discovery.seed_hosts", names::discovery_service(&name)),
        env("node.roles", node_roles(node.roles, node.version).join(",")),
        env("http.port", cluster.spec.general.http_port.to_string()),
        env(
            "OPENSEARCH_JAVA_OPTS",
            node.jvm.unwrap_or(DEFAULT_JAVA_OPTS),
        ),
        env("DISABLE_INSTALL_DEMO_CONFIG", "true"),
    ];

    if node.roles.iter().any(|r| r == "master" || r == "cluster_manager") {
        let key = if major_version(node.version) < 2 {
            "cluster.initial_master_nodes"
        } else {
            "cluster.initial_cluster_manager_nodes"
        };
        vars.push(env(key, names::bootstrap_pod(&name)));
    }

    vars.extend(node.additional_config.iter().map(|(k, v)| env(k, v.as_str())));
    vars.extend(node.extra.iter().cloned());
    vars
}

/// Startup command installing the requested plugins before the engine starts
fn plugin_command(plugins: &[String]) -> Option<Vec<String>> {
    if plugins.is_empty() {
        return None;
    }
    let mut script = String::new();
    for plugin in plugins {
        script.push_str(&format!(
            "./bin/opensearch-plugin list | grep -q '{p}' || ./bin/opensearch-plugin install --batch '{p}'\n",
            p = plugin
        ));
    }
    script.push_str("exec ./opensearch-docker-entrypoint.sh");
    Some(vec!["/bin/bash".to_string(), "-c".to_string(), script])
}

fn engine_container(
    cluster: &OpenSearchCluster,
    setup: &NodeSetup,
    image: String,
    env: Vec<EnvVar>,
    resources: Option<ResourceRequirements>,
) -> Container {
    let general = &cluster.spec.general;
    let mut mounts = setup.mounts.clone();
    mounts.push(VolumeMount {
        name: CONFIG_VOLUME.to_string(),
        mount_path: format!("{}/{}", CONFIG_DIR, CONFIG_FILE),
        sub_path: Some(CONFIG_FILE.to_string()),
        ..Default::default()
    });
    mounts.push(VolumeMount {
        name: DATA_VOLUME.to_string(),
        mount_path: DATA_DIR.to_string(),
        ..Default::default()
    });

    Container {
        name: ENGINE_CONTAINER.to_string(),
        image: Some(image),
        image_pull_policy: general.image_pull_policy.clone(),
        command: plugin_command(&setup.plugins),
        env: Some(env),
        ports: Some(vec![
            ContainerPort {
                name: Some("http".to_string()),
                container_port: general.http_port,
                ..Default::default()
            },
            ContainerPort {
                name: Some("transport".to_string()),
                container_port: TRANSPORT_PORT,
                ..Default::default()
            },
        ]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(general.http_port),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            period_seconds: Some(5),
            timeout_seconds: Some(5),
            ..Default::default()
        }),
        resources,
        security_context: general.security_context.clone(),
        volume_mounts: Some(mounts),
        ..Default::default()
    }
}

fn init_containers(cluster: &OpenSearchCluster, setup: &NodeSetup, image: &str) -> Vec<Container> {
    let helper = &cluster.spec.init_helper;
    let helper_image = helper
        .image
        .clone()
        .unwrap_or_else(|| DEFAULT_INIT_IMAGE.to_string());
    let mut containers = Vec::new();

    if cluster.spec.general.set_vm_max_map_count {
        containers.push(Container {
            name: "init-sysctl".to_string(),
            image: Some(helper_image.clone()),
            command: Some(vec![
                "sysctl".to_string(),
                "-w".to_string(),
                "vm.max_map_count=262144".to_string(),
            ]),
            resources: helper.resources.clone(),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    containers.push(Container {
        name: "init-data".to_string(),
        image: Some(helper_image),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("chown -R {uid}:{uid} {dir}", uid = ENGINE_UID, dir = DATA_DIR),
        ]),
        resources: helper.resources.clone(),
        security_context: Some(SecurityContext {
            run_as_user: Some(0),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: DATA_DIR.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    });

    if !setup.writable_dirs.is_empty() {
        let script = setup
            .writable_dirs
            .iter()
            .map(|d| format!("cp -a {}/. /writable/{}/", d.source, d.volume))
            .collect::<Vec<_>>()
            .join(" && ");
        let mounts = setup
            .writable_dirs
            .iter()
            .map(|d| VolumeMount {
                name: d.volume.clone(),
                mount_path: format!("/writable/{}", d.volume),
                ..Default::default()
            })
            .collect();
        containers.push(Container {
            name: "init-writable".to_string(),
            image: Some(image.to_string()),
            command: Some(vec!["bash".to_string(), "-c".to_string(), script]),
            volume_mounts: Some(mounts),
            ..Default::default()
        });
    }

    containers
}

fn config_volume(cluster: &OpenSearchCluster) -> Volume {
    Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: names::config_map(&cluster.name_any()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn empty_data_volume() -> Volume {
    Volume {
        name: DATA_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// Claim template backing the data directory of a pool
pub fn claim_template(cluster: &OpenSearchCluster, pool: &NodePool) -> PersistentVolumeClaim {
    let pvc = pool
        .persistence
        .as_ref()
        .and_then(|p| p.pvc.clone())
        .unwrap_or_default();
    let access_modes = if pvc.access_modes.is_empty() {
        vec!["ReadWriteOnce".to_string()]
    } else {
        pvc.access_modes
    };

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME.to_string()),
            labels: Some(pool_labels(&cluster.name_any(), &pool.component)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            storage_class_name: pvc.storage_class,
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(disk_size(pool)),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod volume for the data directory, or None when a claim template backs it
fn data_volume(pool: &NodePool) -> Option<Volume> {
    let persistence = pool.persistence.as_ref()?;
    if let Some(empty_dir) = &persistence.empty_dir {
        return Some(Volume {
            name: DATA_VOLUME.to_string(),
            empty_dir: Some(empty_dir.clone()),
            ..Default::default()
        });
    }
    persistence.host_path.as_ref().map(|host_path| Volume {
        name: DATA_VOLUME.to_string(),
        host_path: Some(host_path.clone()),
        ..Default::default()
    })
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    (!items.is_empty()).then(|| items.to_vec())
}

fn non_empty_map(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then(|| map.clone())
}

/// Pod annotations shared by pool and bootstrap pods
fn pod_annotations(
    cluster: &OpenSearchCluster,
    setup: &NodeSetup,
) -> Result<BTreeMap<String, String>, Error> {
    let mut annotations = cluster.spec.general.annotations.clone();
    annotations.insert(names::CONFIG_ANNOTATION.to_string(), setup.checksum()?);
    Ok(annotations)
}

/// Stateful set of one pool running the given engine version
pub fn statefulset(
    cluster: &OpenSearchCluster,
    pool: &NodePool,
    setup: &NodeSetup,
    version: &str,
    replicas: i32,
    parallel: bool,
) -> Result<StatefulSet, Error> {
    let name = cluster.name_any();
    let general = &cluster.spec.general;
    let sts_name = names::statefulset(&name, &pool.component);
    let selector = pool_labels(&name, &pool.component);

    let mut pod_labels = selector.clone();
    pod_labels.extend(pool.labels.clone());
    if pool.is_manager() {
        pod_labels.insert(names::MANAGER_LABEL.to_string(), "true".to_string());
    }
    let mut annotations = pod_annotations(cluster, setup)?;
    annotations.extend(pool.annotations.clone());

    let image = cluster.image_for(version);
    let env = engine_env(
        cluster,
        NodeEnv {
            version,
            roles: &pool.roles,
            jvm: pool.jvm.as_deref(),
            additional_config: &pool.additional_config,
            extra: &pool.env,
        },
    );

    let mut volumes = setup.volumes.clone();
    volumes.push(config_volume(cluster));
    let claims = match data_volume(pool) {
        Some(volume) => {
            volumes.push(volume);
            None
        }
        None => Some(vec![claim_template(cluster, pool)]),
    };

    Ok(StatefulSet {
        metadata: owned_meta(cluster, &sts_name, selector.clone())?,
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            service_name: sts_name,
            pod_management_policy: Some(
                if parallel { "Parallel" } else { "OrderedReady" }.to_string(),
            ),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("OnDelete".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: Some(init_containers(cluster, setup, &image)),
                    containers: vec![engine_container(
                        cluster,
                        setup,
                        image,
                        env,
                        pool.resources.clone(),
                    )],
                    volumes: Some(volumes),
                    node_selector: non_empty_map(&pool.node_selector),
                    tolerations: non_empty(&pool.tolerations),
                    affinity: pool.affinity.clone(),
                    priority_class_name: pool.priority_class_name.clone(),
                    service_account_name: general.service_account.clone(),
                    security_context: general.pod_security_context.clone(),
                    ..Default::default()
                }),
            },
            volume_claim_templates: claims,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Single-node pod that forms the cluster
pub fn bootstrap_pod(cluster: &OpenSearchCluster, setup: &NodeSetup) -> Result<Pod, Error> {
    let name = cluster.name_any();
    let general = &cluster.spec.general;
    let bootstrap = &cluster.spec.bootstrap;
    let pod_name = names::bootstrap_pod(&name);
    let version = cluster
        .status_version()
        .unwrap_or(&general.version)
        .to_string();

    let mut labels = pool_labels(&name, BOOTSTRAP_POOL);
    labels.insert(names::MANAGER_LABEL.to_string(), "true".to_string());
    let mut metadata = owned_meta(cluster, &pod_name, labels)?;
    metadata.annotations = Some(pod_annotations(cluster, setup)?);

    let image = cluster.image_for(&version);
    let roles = vec!["cluster_manager".to_string()];
    let env = engine_env(
        cluster,
        NodeEnv {
            version: &version,
            roles: &roles,
            jvm: bootstrap.jvm.as_deref(),
            additional_config: &bootstrap.additional_config,
            extra: &[],
        },
    );

    let mut volumes = setup.volumes.clone();
    volumes.push(config_volume(cluster));
    volumes.push(empty_data_volume());

    Ok(Pod {
        metadata,
        spec: Some(PodSpec {
            hostname: Some(pod_name),
            subdomain: Some(names::discovery_service(&name)),
            init_containers: Some(init_containers(cluster, setup, &image)),
            containers: vec![engine_container(
                cluster,
                setup,
                image,
                env,
                bootstrap.resources.clone(),
            )],
            volumes: Some(volumes),
            node_selector: non_empty_map(&bootstrap.node_selector),
            tolerations: non_empty(&bootstrap.tolerations),
            affinity: bootstrap.affinity.clone(),
            service_account_name: general.service_account.clone(),
            security_context: general.pod_security_context.clone(),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Disruption budget of one pool
pub fn pdb(cluster: &OpenSearchCluster, pool: &NodePool) -> Result<PodDisruptionBudget, Error> {
    let name = cluster.name_any();
    let labels = pool_labels(&name, &pool.component);
    let config = pool.pdb.clone().unwrap_or_default();
    Ok(PodDisruptionBudget {
        metadata: owned_meta(cluster, names::pdb(&name, &pool.component), labels.clone())?,
        spec: Some(PodDisruptionBudgetSpec {
            min_available: config.min_available,
            max_unavailable: config.max_unavailable,
            selector: Some(LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cluster, pool};
    use opensearch_common::crd::PersistenceConfig;

    fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
        container
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    #[test]
    fn statefulset_is_ordered_on_delete_with_claims() {
        let masters = pool("masters", 3, &["cluster_manager", "data"]);
        let c = cluster(vec![masters.clone()]);
        let mut setup = NodeSetup::default();
        setup.set("node.attr.zone", "a");

        let sts = statefulset(&c, &masters, &setup, "2.11.0", 2, false).unwrap();
        let spec = sts.spec.unwrap();

        assert_eq!(sts.metadata.name.as_deref(), Some("logs-masters"));
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(spec.pod_management_policy.as_deref(), Some("OrderedReady"));
        assert_eq!(
            spec.update_strategy.and_then(|s| s.type_).as_deref(),
            Some("OnDelete")
        );
        let claims = spec.volume_claim_templates.unwrap();
        let requests = claims[0]
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .unwrap();
        assert_eq!(requests["storage"], Quantity("10Gi".to_string()));

        let template = spec.template;
        let annotations = template.metadata.unwrap().annotations.unwrap();
        assert_eq!(annotations[names::CONFIG_ANNOTATION], setup.checksum().unwrap());
        let container = &template.spec.unwrap().containers[0];
        assert_eq!(
            container.image.as_deref(),
            Some("docker.io/opensearchproject/opensearch:2.11.0")
        );
        assert_eq!(env_value(container, "node.roles"), Some("cluster_manager,data"));
        assert_eq!(
            env_value(container, "cluster.initial_cluster_manager_nodes"),
            Some("logs-bootstrap-0")
        );
    }

    #[test]
    fn legacy_versions_use_master_naming() {
        let masters = pool("masters", 3, &["cluster_manager"]);
        let c = cluster(vec![masters.clone()]);
        let sts = statefulset(&c, &masters, &NodeSetup::default(), "1.3.0", 3, true).unwrap();
        let container = &sts.spec.unwrap().template.spec.unwrap().containers[0];

        assert_eq!(env_value(container, "node.roles"), Some("master"));
        assert_eq!(
            env_value(container, "cluster.initial_master_nodes"),
            Some("logs-bootstrap-0")
        );
    }

    #[test]
    fn ephemeral_pools_have_no_claims() {
        let mut data = pool("data", 2, &["data"]);
        data.persistence = Some(PersistenceConfig {
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
        let c = cluster(vec![data.clone()]);
        let spec = statefulset(&c, &data, &NodeSetup::default(), "2.11.0", 2, true)
            .unwrap()
            .spec
            .unwrap();

        assert!(spec.volume_claim_templates.is_none());
        let volumes = spec.template.spec.unwrap().volumes.unwrap();
        assert!(volumes
            .iter()
            .any(|v| v.name == DATA_VOLUME && v.empty_dir.is_some()));
    }

    #[test]
    fn bootstrap_pod_forms_a_single_manager() {
        let c = cluster(vec![pool("masters", 3, &["cluster_manager"])]);
        let pod = bootstrap_pod(&c, &NodeSetup::default()).unwrap();

        assert_eq!(pod.metadata.name.as_deref(), Some("logs-bootstrap-0"));
        let labels = pod.metadata.labels.unwrap();
        assert_eq!(labels[names::MANAGER_LABEL], "true");
        let spec = pod.spec.unwrap();
        assert_eq!(spec.subdomain.as_deref(), Some("logs-discovery"));
        assert_eq!(
            env_value(&spec.containers[0], "cluster.initial_cluster_manager_nodes"),
            Some("logs-bootstrap-0")
        );
    }

    #[test]
    fn plugins_are_installed_before_start() {
        let command = plugin_command(&["repository-s3".to_string()]).unwrap();
        assert!(command[2].contains("install --batch 'repository-s3'"));
        assert!(command[2].ends_with("exec ./opensearch-docker-entrypoint.sh"));
        assert!(plugin_command(&[]).is_none());
    }

    #[test]
    fn per_pool_objects_carry_the_pool_label() {
        use opensearch_common::kube_utils::NODEPOOL_LABEL;
        let c = cluster(vec![]);
        let warm = pool("warm", 2, &["data"]);
        let pool_label = |labels: &BTreeMap<String, String>| labels.get(NODEPOOL_LABEL).cloned();

        let svc = pool_service(&c, &warm).unwrap();
        assert_eq!(pool_label(svc.labels()).as_deref(), Some("warm"));
        assert_eq!(svc.spec.unwrap().selector.unwrap()[NODEPOOL_LABEL], "warm");

        let sts = statefulset(&c, &warm, &NodeSetup::default(), "2.11.0", 2, true).unwrap();
        assert_eq!(pool_label(sts.labels()).as_deref(), Some("warm"));
        assert_eq!(sts.spec.unwrap().service_name, "logs-warm");

        let budget = pdb(&c, &warm).unwrap();
        assert_eq!(pool_label(budget.labels()).as_deref(), Some("warm"));

        let discovery = discovery_service(&c).unwrap();
        assert_eq!(pool_label(discovery.labels()), None);
    }

    #[test]
    fn discovery_selects_managers_and_publishes_unready() {
        let c = cluster(vec![]);
        let svc = discovery_service(&c).unwrap();
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
        assert_eq!(spec.selector.unwrap()[names::MANAGER_LABEL], "true");
    }
}
