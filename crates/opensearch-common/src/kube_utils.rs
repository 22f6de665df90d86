//! Shared Kubernetes helpers: clients, labels, owner references, secrets
//! and finalizers

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::{Client, Config, Resource, ResourceExt};
use sha1::{Digest, Sha1};

use crate::crd::OpenSearchCluster;
use crate::Error;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "opensearch-operator";

/// Label carrying the owning cluster name
pub const CLUSTER_LABEL: &str = "opster.io/opensearch-cluster";
/// Label carrying the node pool component
pub const NODEPOOL_LABEL: &str = "opster.io/opensearch-nodepool";
/// Label marking operator-run jobs
pub const JOB_LABEL: &str = "opster.io/opensearch-job";

/// Finalizer placed on resources that own engine-side objects
pub const FINALIZER: &str = "opensearch.opster.io/finalizer";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from the in-cluster or local config
pub async fn create_client() -> Result<Client, Error> {
    create_client_with_timeout(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client with custom timeouts
pub async fn create_client_with_timeout(
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = Config::infer().await.map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
    })?;
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Labels shared by every object of a cluster
pub fn cluster_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CLUSTER_LABEL.to_string(), cluster.to_string())])
}

/// Labels selecting the pods of one node pool
pub fn pool_labels(cluster: &str, pool: &str) -> BTreeMap<String, String> {
    let mut labels = cluster_labels(cluster);
    labels.insert(NODEPOOL_LABEL.to_string(), pool.to_string());
    labels
}

/// Controller owner reference pointing at the cluster
pub fn owner_reference(cluster: &OpenSearchCluster) -> Result<OwnerReference, Error> {
    cluster.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context(
            "owner_reference",
            format!("cluster {} has no uid", cluster.name_any()),
        )
    })
}

/// Metadata of a child object owned by the cluster
pub fn owned_meta(
    cluster: &OpenSearchCluster,
    name: impl Into<String>,
    labels: BTreeMap<String, String>,
) -> Result<ObjectMeta, Error> {
    Ok(ObjectMeta {
        name: Some(name.into()),
        namespace: cluster.namespace(),
        labels: Some(labels),
        owner_references: Some(vec![owner_reference(cluster)?]),
        ..Default::default()
    })
}

/// SHA-1 hex digest used for change-detection annotations
pub fn sha1_hex(input: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha1::digest(input.as_ref()))
}

/// Decoded UTF-8 value of one secret key
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(bytes.0.clone()).ok();
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .cloned()
}

/// Whether the object carries the operator finalizer
pub fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}

/// Add the operator finalizer; false when already present
pub fn add_finalizer<K: Resource>(obj: &mut K) -> bool {
    if has_finalizer(obj) {
        return false;
    }
    obj.finalizers_mut().push(FINALIZER.to_string());
    true
}

/// Remove the operator finalizer; false when absent
pub fn remove_finalizer<K: Resource>(obj: &mut K) -> bool {
    let before = obj.finalizers().len();
    obj.finalizers_mut().retain(|f| f != FINALIZER);
    before != obj.finalizers().len()
}

/// Whether deletion of the object has been requested
pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterSpec, GeneralConfig};
    use k8s_openapi::ByteString;

    fn cluster() -> OpenSearchCluster {
        let mut cluster = OpenSearchCluster::new(
            "logs",
            ClusterSpec {
                general: GeneralConfig {
                    service_name: "logs".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        cluster.metadata.namespace = Some("search".to_string());
        cluster.metadata.uid = Some("uid-logs".to_string());
        cluster
    }

    #[test]
    fn pool_labels_extend_cluster_labels() {
        let labels = pool_labels("logs", "masters");
        assert_eq!(labels.get(CLUSTER_LABEL).map(String::as_str), Some("logs"));
        assert_eq!(labels.get(NODEPOOL_LABEL).map(String::as_str), Some("masters"));
    }

    #[test]
    fn owned_meta_points_at_cluster() {
        let meta = owned_meta(&cluster(), "logs-config", cluster_labels("logs")).unwrap();
        assert_eq!(meta.namespace.as_deref(), Some("search"));
        let owner = &meta.owner_references.unwrap()[0];
        assert_eq!(owner.uid, "uid-logs");
        assert_eq!(owner.kind, "OpenSearchCluster");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn owner_reference_requires_uid() {
        let mut c = cluster();
        c.metadata.uid = None;
        assert!(owner_reference(&c).is_err());
    }

    #[test]
    fn sha1_is_stable() {
        assert_eq!(sha1_hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn secret_value_reads_data_then_string_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                "password".to_string(),
                ByteString(b"s3cret".to_vec()),
            )])),
            string_data: Some(BTreeMap::from([(
                "username".to_string(),
                "admin".to_string(),
            )])),
            ..Default::default()
        };
        assert_eq!(secret_value(&secret, "password").as_deref(), Some("s3cret"));
        assert_eq!(secret_value(&secret, "username").as_deref(), Some("admin"));
        assert_eq!(secret_value(&secret, "missing"), None);
    }

    #[test]
    fn finalizer_add_and_remove_are_idempotent() {
        let mut c = cluster();
        assert!(add_finalizer(&mut c));
        assert!(!add_finalizer(&mut c));
        assert!(has_finalizer(&c));
        assert!(remove_finalizer(&mut c));
        assert!(!remove_finalizer(&mut c));
        assert!(!has_finalizer(&c));
    }
}
