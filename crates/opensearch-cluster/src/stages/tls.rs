//! TLS material for the transport and HTTP interfaces
//!
//! Per interface the cluster either brings its own secret or lets the
//! operator issue certificates from a CA. Generated certificates are
//! reissued when they approach expiry, no longer cover the service names,
//! or were signed by a different CA. Per-node transport certificates are
//! only ever added to their secret, never removed, so a pod that scaled
//! away and comes back finds its pair unchanged.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, info};

use opensearch_common::crd::{OpenSearchCluster, TlsInterfaceConfig};
use opensearch_common::events::{actions, reasons};
use opensearch_common::k8s::DesiredState;
use opensearch_common::kube_utils::secret_value;
use opensearch_common::metrics;
use opensearch_common::reconcile::ReconcileResult;
use opensearch_common::Error;
use opensearch_pki::{CertRequest, CertificateAuthority, CertificateInfo, PkiError};

use crate::builders::{secret, secret_volume};
use crate::controller::Context;
use crate::names;
use crate::setup::{yaml_list, NodeSetup, CONFIG_DIR};

/// Interface name of node to node traffic
pub const TRANSPORT: &str = "transport";
/// Interface name of REST traffic
pub const HTTP: &str = "http";
/// Common name of the generated admin client certificate
pub const ADMIN_CN: &str = "admin";

const CA_CERT: &str = "ca.crt";
const CA_KEY: &str = "ca.key";
const TLS_CERT: &str = "tls.crt";
const TLS_KEY: &str = "tls.key";

fn pki_error(e: PkiError) -> Error {
    Error::internal_with_context("pki", e.to_string())
}

fn generates(config: Option<&TlsInterfaceConfig>) -> bool {
    config.map(|c| c.generate).unwrap_or(false)
}

/// Whether the operator issues any node certificate for the cluster
pub fn generates_node_certs(cluster: &OpenSearchCluster) -> bool {
    generates(cluster.transport_tls()) || generates(cluster.http_tls())
}

fn dashboards_generate(cluster: &OpenSearchCluster) -> bool {
    cluster
        .dashboards()
        .and_then(|d| d.tls.as_ref())
        .map(|t| t.enable && t.generate)
        .unwrap_or(false)
}

/// DNS names under which the client service is reachable
pub fn service_sans(cluster: &OpenSearchCluster, dns_base: &str) -> Vec<String> {
    let service = &cluster.spec.general.service_name;
    let namespace = cluster.namespace().unwrap_or_default();
    vec![
        service.clone(),
        format!("{}.{}", service, namespace),
        format!("{}.{}.svc", service, namespace),
        format!("{}.{}.svc.{}", service, namespace, dns_base),
    ]
}

/// Whether a certificate can stay in use
fn still_valid(cert_pem: &str, ca: &CertificateAuthority, sans: &[String]) -> bool {
    let Ok(info) = CertificateInfo::from_pem(cert_pem) else {
        return false;
    };
    !info.needs_rotation() && info.covers(sans) && ca.signed(cert_pem).unwrap_or(false)
}

pub(crate) fn secret_data(secret: &Secret) -> BTreeMap<String, String> {
    secret
        .data
        .as_ref()
        .map(|data| {
            data.iter()
                .filter_map(|(k, v)| String::from_utf8(v.0.clone()).ok().map(|v| (k.clone(), v)))
                .collect()
        })
        .unwrap_or_default()
}

fn record_expiry(cluster: &OpenSearchCluster, interface: &str, cert_pem: &str) {
    if let Ok(info) = CertificateInfo::from_pem(cert_pem) {
        metrics::record_certificate_expiry(&cluster.name_any(), interface, info.remaining_secs());
    }
}

fn ca_from_secret(cluster: &OpenSearchCluster, secret: &Secret) -> Result<CertificateAuthority, Error> {
    let secret_name = secret.name_any();
    match (secret_value(secret, CA_CERT), secret_value(secret, CA_KEY)) {
        (Some(cert), Some(key)) => CertificateAuthority::from_pem(&cert, &key).map_err(pki_error),
        _ => Err(Error::validation_for(
            cluster.name_any(),
            format!("CA secret {} needs {} and {}", secret_name, CA_CERT, CA_KEY),
        )),
    }
}

/// Load the signing CA: user-provided, previously generated, or new
async fn load_ca(cluster: &OpenSearchCluster, ctx: &Context) -> Result<CertificateAuthority, Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    let provided = [cluster.transport_tls(), cluster.http_tls()]
        .into_iter()
        .flatten()
        .filter(|c| c.generate)
        .find_map(|c| c.ca_secret.as_ref());
    if let Some(reference) = provided {
        let secret = ctx
            .k8s
            .get::<Secret>(&namespace, &reference.name)
            .await?
            .ok_or_else(|| {
                Error::pending(&name, format!("CA secret {} does not exist", reference.name))
            })?;
        return ca_from_secret(cluster, &secret);
    }

    let secret_name = names::ca_secret(&name);
    if let Some(existing) = ctx.k8s.get::<Secret>(&namespace, &secret_name).await? {
        return ca_from_secret(cluster, &existing);
    }

    let ca = CertificateAuthority::new(&format!("{}-ca", name)).map_err(pki_error)?;
    let data = BTreeMap::from([
        (CA_CERT.to_string(), ca.ca_cert_pem().to_string()),
        (CA_KEY.to_string(), ca.ca_key_pem().to_string()),
    ]);
    ctx.k8s.create(&secret(cluster, &secret_name, data)?).await?;
    info!(secret = %secret_name, "generated certificate authority");
    ctx.publish(
        cluster,
        EventType::Normal,
        reasons::TLS,
        actions::APPLY,
        format!("Generated certificate authority {}", secret_name),
    )
    .await;
    Ok(ca)
}

/// Issue (or keep) a single certificate for an interface
pub(crate) async fn single_cert(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    ca: &CertificateAuthority,
    interface: &str,
    common_name: &str,
    sans: Vec<String>,
) -> Result<String, Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    let secret_name = names::cert_secret(&name, interface);

    if let Some(existing) = ctx.k8s.get::<Secret>(&namespace, &secret_name).await? {
        if let (Some(cert), Some(_)) = (
            secret_value(&existing, TLS_CERT),
            secret_value(&existing, TLS_KEY),
        ) {
            if still_valid(&cert, ca, &sans) {
                record_expiry(cluster, interface, &cert);
                return Ok(secret_name);
            }
        }
    }

    let issued = ca
        .issue(&CertRequest::node(common_name, sans))
        .map_err(pki_error)?;
    record_expiry(cluster, interface, &issued.cert_pem);
    let data = BTreeMap::from([
        (TLS_CERT.to_string(), issued.cert_pem),
        (TLS_KEY.to_string(), issued.key_pem),
        (CA_CERT.to_string(), ca.ca_cert_pem().to_string()),
    ]);
    ctx.k8s
        .reconcile(&secret(cluster, &secret_name, data)?, DesiredState::Present)
        .await?;
    ctx.publish(
        cluster,
        EventType::Normal,
        reasons::TLS,
        actions::APPLY,
        format!("Issued {} certificate", interface),
    )
    .await;
    Ok(secret_name)
}

/// Pods that need a transport certificate, with their DNS names
fn node_identities(cluster: &OpenSearchCluster) -> Vec<(String, Vec<String>)> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    let mut nodes = Vec::new();

    for pool in &cluster.spec.node_pools {
        let service = names::statefulset(&name, &pool.component);
        for ordinal in 0..pool.replicas {
            let pod = names::pod(&name, &pool.component, ordinal);
            let sans = vec![
                pod.clone(),
                format!("{}.{}", pod, service),
                format!("{}.{}.{}", pod, service, namespace),
                format!("{}.{}.{}.svc", pod, service, namespace),
            ];
            nodes.push((pod, sans));
        }
    }

    if !cluster.is_initialized() {
        let pod = names::bootstrap_pod(&name);
        let service = names::discovery_service(&name);
        let sans = vec![pod.clone(), format!("{}.{}.{}", pod, service, namespace)];
        nodes.push((pod, sans));
    }
    nodes
}

/// Keep one certificate per pod in the per-node transport secret
async fn per_node_certs(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    ca: &CertificateAuthority,
) -> Result<String, Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    let secret_name = names::cert_secret(&name, TRANSPORT);

    let existing = ctx
        .k8s
        .get::<Secret>(&namespace, &secret_name)
        .await?
        .map(|s| secret_data(&s))
        .unwrap_or_default();
    let mut data = existing.clone();
    let mut issued = 0;

    for (pod, sans) in node_identities(cluster) {
        let cert_key = format!("{}.crt", pod);
        let key_key = format!("{}.key", pod);
        let current = data
            .get(&cert_key)
            .filter(|cert| data.contains_key(&key_key) && still_valid(cert, ca, &sans));
        if current.is_some() {
            continue;
        }
        let cert = ca.issue(&CertRequest::node(pod.as_str(), sans)).map_err(pki_error)?;
        data.insert(cert_key, cert.cert_pem);
        data.insert(key_key, cert.key_pem);
        issued += 1;
    }
    data.insert(CA_CERT.to_string(), ca.ca_cert_pem().to_string());

    let earliest = data
        .iter()
        .filter(|(k, _)| k.ends_with(".crt") && k.as_str() != CA_CERT)
        .filter_map(|(_, v)| CertificateInfo::from_pem(v).ok())
        .map(|info| info.remaining_secs())
        .min();
    if let Some(remaining) = earliest {
        metrics::record_certificate_expiry(&name, TRANSPORT, remaining);
    }

    if data != existing {
        ctx.k8s
            .reconcile(&secret(cluster, &secret_name, data)?, DesiredState::Present)
            .await?;
        ctx.publish(
            cluster,
            EventType::Normal,
            reasons::TLS,
            actions::APPLY,
            format!("Issued {} per-node transport certificates", issued),
        )
        .await;
    }
    Ok(secret_name)
}

/// Generated admin client certificate used by the security config applier
async fn admin_cert(cluster: &OpenSearchCluster, ctx: &Context, ca: &CertificateAuthority) -> Result<(), Error> {
    let namespace = cluster.namespace().unwrap_or_default();
    let secret_name = names::admin_cert_secret(&cluster.name_any());

    if let Some(existing) = ctx.k8s.get::<Secret>(&namespace, &secret_name).await? {
        if let Some(cert) = secret_value(&existing, TLS_CERT) {
            if still_valid(&cert, ca, &[]) {
                return Ok(());
            }
        }
    }

    let issued = ca.issue(&CertRequest::client(ADMIN_CN)).map_err(pki_error)?;
    let data = BTreeMap::from([
        (TLS_CERT.to_string(), issued.cert_pem),
        (TLS_KEY.to_string(), issued.key_pem),
        (CA_CERT.to_string(), ca.ca_cert_pem().to_string()),
    ]);
    ctx.k8s
        .reconcile(&secret(cluster, &secret_name, data)?, DesiredState::Present)
        .await?;
    debug!(secret = %secret_name, "issued admin certificate");
    Ok(())
}

/// File paths of one interface, relative to the config directory
struct PemPaths {
    cert: String,
    key: String,
    ca: String,
}

/// Mount a user-provided certificate secret and, when given, its CA secret
fn mount_provided(
    cluster: &OpenSearchCluster,
    setup: &mut NodeSetup,
    config: &TlsInterfaceConfig,
    interface: &str,
) -> Result<PemPaths, Error> {
    let dir = format!("tls-{}", interface);
    let provided = config.secret.as_ref().ok_or_else(|| {
        Error::validation_for_field(
            cluster.name_any(),
            format!("spec.security.tls.{}.secret", interface),
            "a certificate secret is required unless generate is set",
        )
    })?;
    let (volume, mount) = secret_volume(
        &format!("{}-cert", interface),
        &provided.name,
        &format!("{}/{}", CONFIG_DIR, dir),
    );
    setup.add_volume(volume, mount);

    let ca = match &config.ca_secret {
        Some(ca_secret) => {
            let ca_dir = format!("{}-ca", dir);
            let (volume, mount) = secret_volume(
                &format!("{}-ca", interface),
                &ca_secret.name,
                &format!("{}/{}", CONFIG_DIR, ca_dir),
            );
            setup.add_volume(volume, mount);
            format!("{}/{}", ca_dir, CA_CERT)
        }
        None => format!("{}/{}", dir, CA_CERT),
    };
    Ok(PemPaths {
        cert: format!("{}/{}", dir, TLS_CERT),
        key: format!("{}/{}", dir, TLS_KEY),
        ca,
    })
}

fn mount_generated(setup: &mut NodeSetup, interface: &str, secret_name: &str, per_node: bool) -> PemPaths {
    let dir = format!("tls-{}", interface);
    let (volume, mount) = secret_volume(
        &format!("{}-cert", interface),
        secret_name,
        &format!("{}/{}", CONFIG_DIR, dir),
    );
    setup.add_volume(volume, mount);
    let (cert, key) = if per_node {
        ("${HOSTNAME}.crt", "${HOSTNAME}.key")
    } else {
        (TLS_CERT, TLS_KEY)
    };
    PemPaths {
        cert: format!("{}/{}", dir, cert),
        key: format!("{}/{}", dir, key),
        ca: format!("{}/{}", dir, CA_CERT),
    }
}

fn set_pem_paths(setup: &mut NodeSetup, prefix: &str, paths: &PemPaths) {
    setup.set(format!("{}.pemcert_filepath", prefix), paths.cert.clone());
    setup.set(format!("{}.pemkey_filepath", prefix), paths.key.clone());
    setup.set(format!("{}.pemtrustedcas_filepath", prefix), paths.ca.clone());
}

/// Issue, mount and configure TLS for both interfaces
pub async fn reconcile(
    cluster: &OpenSearchCluster,
    ctx: &Context,
    setup: &mut NodeSetup,
) -> Result<ReconcileResult, Error> {
    let name = cluster.name_any();
    let sans = service_sans(cluster, &ctx.config.dns_base);
    let any_generated = generates_node_certs(cluster);

    let ca = if any_generated || dashboards_generate(cluster) {
        let ca = load_ca(cluster, ctx).await?;
        if let Ok(info) = ca.cert_info() {
            metrics::record_certificate_expiry(&name, "ca", info.remaining_secs());
        }
        setup.ca = Some(ca.clone());
        Some(ca)
    } else {
        None
    };

    if let Some(config) = cluster.transport_tls() {
        let paths = match (&ca, config.generate) {
            (Some(ca), true) => {
                let secret_name = if config.per_node {
                    per_node_certs(cluster, ctx, ca).await?
                } else {
                    single_cert(cluster, ctx, ca, TRANSPORT, &name, sans.clone()).await?
                };
                mount_generated(setup, TRANSPORT, &secret_name, config.per_node)
            }
            _ => mount_provided(cluster, setup, config, TRANSPORT)?,
        };
        set_pem_paths(setup, "plugins.security.ssl.transport", &paths);
        setup.set(
            "plugins.security.ssl.transport.enforce_hostname_verification",
            false,
        );

        let nodes_dn = if !config.nodes_dn.is_empty() {
            Some(config.nodes_dn.clone())
        } else if config.generate && config.per_node {
            Some(vec![format!("CN={}-*", name)])
        } else if config.generate {
            Some(vec![format!("CN={}", name)])
        } else {
            None
        };
        if let Some(dns) = nodes_dn {
            setup.set("plugins.security.nodes_dn", yaml_list(&dns));
        }
    }

    if let Some(config) = cluster.http_tls() {
        let paths = match (&ca, config.generate) {
            (Some(ca), true) => {
                let secret_name = single_cert(cluster, ctx, ca, HTTP, &name, sans.clone()).await?;
                mount_generated(setup, HTTP, &secret_name, false)
            }
            _ => mount_provided(cluster, setup, config, HTTP)?,
        };
        setup.set("plugins.security.ssl.http.enabled", true);
        set_pem_paths(setup, "plugins.security.ssl.http", &paths);
    }

    let admin_dn: Vec<String> = [cluster.transport_tls(), cluster.http_tls()]
        .into_iter()
        .flatten()
        .flat_map(|c| c.admin_dn.iter().cloned())
        .collect();
    if !admin_dn.is_empty() {
        setup.set("plugins.security.authcz.admin_dn", yaml_list(&admin_dn));
    } else if any_generated {
        setup.set(
            "plugins.security.authcz.admin_dn",
            yaml_list(&[format!("CN={}", ADMIN_CN)]),
        );
    }

    if let (Some(ca), true) = (&ca, any_generated) {
        admin_cert(cluster, ctx, ca).await?;
    }

    Ok(ReconcileResult::done())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cluster, pool, Harness, NAMESPACE};
    use opensearch_common::crd::{SecretRef, SecurityConfig, TlsConfig};

    fn with_tls(transport: Option<TlsInterfaceConfig>, http: Option<TlsInterfaceConfig>) -> OpenSearchCluster {
        let mut c = cluster(vec![pool("masters", 2, &["cluster_manager", "data"])]);
        c.spec.security = Some(SecurityConfig {
            config: None,
            tls: Some(TlsConfig { transport, http }),
        });
        c
    }

    fn generated() -> TlsInterfaceConfig {
        TlsInterfaceConfig {
            generate: true,
            ..Default::default()
        }
    }

    async fn stored_secret(h: &Harness, name: &str) -> Secret {
        h.store
            .fetch::<Secret>(NAMESPACE, name)
            .await
            .unwrap_or_else(|| panic!("secret {} should exist", name))
    }

    #[tokio::test]
    async fn generated_certificates_cover_the_service() {
        let h = Harness::new();
        let c = h.insert(&with_tls(Some(generated()), Some(generated()))).await;
        let mut setup = NodeSetup::default();

        reconcile(&c, &h.ctx, &mut setup).await.unwrap();

        let ca_secret = stored_secret(&h, "logs-ca").await;
        let ca = ca_from_secret(&c, &ca_secret).unwrap();
        let http = stored_secret(&h, "logs-http-cert").await;
        let cert = secret_value(&http, TLS_CERT).unwrap();
        assert!(ca.signed(&cert).unwrap());
        let info = CertificateInfo::from_pem(&cert).unwrap();
        assert!(info
            .dns_names
            .contains(&"logs.search.svc.cluster.local".to_string()));

        assert!(stored_secret(&h, "logs-transport-cert").await.data.is_some());
        assert!(stored_secret(&h, "logs-admin-cert").await.data.is_some());
        assert!(setup.ca.is_some());
        assert_eq!(
            setup.settings["plugins.security.ssl.transport.pemcert_filepath"],
            "tls-transport/tls.crt"
        );
        assert_eq!(setup.settings["plugins.security.ssl.http.enabled"], true);
        assert_eq!(setup.settings["plugins.security.nodes_dn"], yaml_list(&["CN=logs"]));
        assert_eq!(
            setup.settings["plugins.security.authcz.admin_dn"],
            yaml_list(&["CN=admin"])
        );
        assert!(setup.volumes.iter().any(|v| v.name == "transport-cert"));
    }

    #[tokio::test]
    async fn valid_certificates_are_kept() {
        let h = Harness::new();
        let c = h.insert(&with_tls(Some(generated()), None)).await;

        reconcile(&c, &h.ctx, &mut NodeSetup::default()).await.unwrap();
        let first = secret_value(&stored_secret(&h, "logs-transport-cert").await, TLS_CERT);
        let writes = h.store.write_count().await;

        reconcile(&c, &h.ctx, &mut NodeSetup::default()).await.unwrap();
        let second = secret_value(&stored_secret(&h, "logs-transport-cert").await, TLS_CERT);

        assert_eq!(first, second);
        assert_eq!(h.store.write_count().await, writes);
    }

    #[tokio::test]
    async fn per_node_mode_issues_one_pair_per_pod() {
        let h = Harness::new();
        let c = h
            .insert(&with_tls(
                Some(TlsInterfaceConfig {
                    generate: true,
                    per_node: true,
                    ..Default::default()
                }),
                None,
            ))
            .await;
        let mut setup = NodeSetup::default();

        reconcile(&c, &h.ctx, &mut setup).await.unwrap();

        let data = secret_data(&stored_secret(&h, "logs-transport-cert").await);
        for pod in ["logs-masters-0", "logs-masters-1", "logs-bootstrap-0"] {
            assert!(data.contains_key(&format!("{}.crt", pod)), "{}", pod);
            assert!(data.contains_key(&format!("{}.key", pod)), "{}", pod);
        }
        assert!(data.contains_key(CA_CERT));
        let info = CertificateInfo::from_pem(&data["logs-masters-1.crt"]).unwrap();
        assert_eq!(info.common_name, "logs-masters-1");
        assert_eq!(
            setup.settings["plugins.security.ssl.transport.pemcert_filepath"],
            "tls-transport/${HOSTNAME}.crt"
        );
        assert_eq!(setup.settings["plugins.security.nodes_dn"], yaml_list(&["CN=logs-*"]));
    }

    #[tokio::test]
    async fn per_node_entries_survive_scale_down() {
        let h = Harness::new();
        let c = h
            .insert(&with_tls(
                Some(TlsInterfaceConfig {
                    generate: true,
                    per_node: true,
                    ..Default::default()
                }),
                None,
            ))
            .await;
        reconcile(&c, &h.ctx, &mut NodeSetup::default()).await.unwrap();

        let mut smaller = c.clone();
        smaller.spec.node_pools[0].replicas = 1;
        reconcile(&smaller, &h.ctx, &mut NodeSetup::default()).await.unwrap();

        let data = secret_data(&stored_secret(&h, "logs-transport-cert").await);
        assert!(data.contains_key("logs-masters-1.crt"));
    }

    #[tokio::test]
    async fn provided_secrets_are_mounted_without_issuing() {
        let h = Harness::new();
        let c = h
            .insert(&with_tls(
                Some(TlsInterfaceConfig {
                    secret: Some(SecretRef {
                        name: "node-certs".to_string(),
                    }),
                    ca_secret: Some(SecretRef {
                        name: "corp-ca".to_string(),
                    }),
                    nodes_dn: vec!["CN=node.example.com".to_string()],
                    admin_dn: vec!["CN=ops".to_string()],
                    ..Default::default()
                }),
                None,
            ))
            .await;
        let mut setup = NodeSetup::default();

        reconcile(&c, &h.ctx, &mut setup).await.unwrap();

        assert!(h.store.all::<Secret>(NAMESPACE).await.is_empty());
        assert!(setup.ca.is_none());
        assert_eq!(
            setup.settings["plugins.security.ssl.transport.pemtrustedcas_filepath"],
            "tls-transport-ca/ca.crt"
        );
        assert_eq!(
            setup.settings["plugins.security.nodes_dn"],
            yaml_list(&["CN=node.example.com"])
        );
        assert_eq!(setup.settings["plugins.security.authcz.admin_dn"], yaml_list(&["CN=ops"]));
        let volumes: Vec<_> = setup.volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(volumes, vec!["transport-cert", "transport-ca"]);
    }

    #[tokio::test]
    async fn provided_mode_without_secret_is_rejected() {
        let h = Harness::new();
        let c = h
            .insert(&with_tls(Some(TlsInterfaceConfig::default()), None))
            .await;

        let err = reconcile(&c, &h.ctx, &mut NodeSetup::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn user_ca_signs_generated_certificates() {
        let h = Harness::new();
        let corp = CertificateAuthority::new("corp").unwrap();
        let c = with_tls(
            Some(TlsInterfaceConfig {
                generate: true,
                ca_secret: Some(SecretRef {
                    name: "corp-ca".to_string(),
                }),
                ..Default::default()
            }),
            None,
        );
        let c = h.insert(&c).await;
        let ca_secret = secret(
            &c,
            "corp-ca",
            BTreeMap::from([
                (CA_CERT.to_string(), corp.ca_cert_pem().to_string()),
                (CA_KEY.to_string(), corp.ca_key_pem().to_string()),
            ]),
        )
        .unwrap();
        h.store.insert(&ca_secret).await;

        reconcile(&c, &h.ctx, &mut NodeSetup::default()).await.unwrap();

        assert!(h.store.fetch::<Secret>(NAMESPACE, "logs-ca").await.is_none());
        let cert = secret_value(&stored_secret(&h, "logs-transport-cert").await, TLS_CERT).unwrap();
        assert!(corp.signed(&cert).unwrap());
    }

    #[tokio::test]
    async fn missing_user_ca_is_pending() {
        let h = Harness::new();
        let c = h
            .insert(&with_tls(
                Some(TlsInterfaceConfig {
                    generate: true,
                    ca_secret: Some(SecretRef {
                        name: "corp-ca".to_string(),
                    }),
                    ..Default::default()
                }),
                None,
            ))
            .await;

        let err = reconcile(&c, &h.ctx, &mut NodeSetup::default())
            .await
            .unwrap_err();
        assert!(err.is_pending());
    }
}
