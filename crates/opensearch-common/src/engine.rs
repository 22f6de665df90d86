//! Engine client construction for a given cluster

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use opensearch_client::{ConnectionConfig, OpenSearchClient, Transport};
use tracing::debug;

use crate::config::OperatorConfig;
use crate::crd::OpenSearchCluster;
use crate::k8s::K8s;
use crate::kube_utils::secret_value;
use crate::Error;

/// Basic-auth user when no admin credentials secret is configured
pub const DEFAULT_ADMIN_USER: &str = "admin";
/// Basic-auth password when no admin credentials secret is configured
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// Builds engine clients for clusters
#[derive(Clone)]
pub struct EngineConnector {
    config: Arc<OperatorConfig>,
    transport: Option<Arc<dyn Transport>>,
}

impl EngineConnector {
    /// Connector using HTTPS unless a transport is injected
    pub fn new(config: Arc<OperatorConfig>, transport: Option<Arc<dyn Transport>>) -> Self {
        Self { config, transport }
    }

    /// In-cluster URL of the cluster's HTTP endpoint
    pub fn url(&self, cluster: &OpenSearchCluster) -> String {
        let namespace = cluster.namespace().unwrap_or_default();
        format!(
            "https://{}:{}",
            self.config
                .service_host(&cluster.spec.general.service_name, &namespace),
            cluster.spec.general.http_port
        )
    }

    /// Admin credentials of the cluster
    pub async fn credentials(
        &self,
        k8s: &K8s,
        cluster: &OpenSearchCluster,
    ) -> Result<(String, String), Error> {
        let Some(secret_ref) = cluster
            .security_config()
            .and_then(|s| s.admin_credentials_secret.as_ref())
        else {
            return Ok((
                DEFAULT_ADMIN_USER.to_string(),
                DEFAULT_ADMIN_PASSWORD.to_string(),
            ));
        };

        let namespace = cluster.namespace().unwrap_or_default();
        let secret = k8s
            .get::<Secret>(&namespace, &secret_ref.name)
            .await?
            .ok_or_else(|| {
                Error::pending(
                    cluster.name_any(),
                    format!("admin credentials secret {} not found", secret_ref.name),
                )
            })?;
        let field = |key: &str| {
            secret_value(&secret, key).ok_or_else(|| {
                Error::validation_for_field(
                    cluster.name_any(),
                    "spec.security.config.adminCredentialsSecret",
                    format!("secret {} has no {} key", secret_ref.name, key),
                )
            })
        };
        Ok((field("username")?, field("password")?))
    }

    /// Engine client for the cluster
    pub async fn connect(&self, k8s: &K8s, cluster: &OpenSearchCluster) -> Result<OpenSearchClient, Error> {
        if let Some(transport) = &self.transport {
            return Ok(OpenSearchClient::with_transport(transport.clone()));
        }
        let (username, password) = self.credentials(k8s, cluster).await?;
        let url = self.url(cluster);
        debug!(cluster = %cluster.name_any(), %url, "Connecting to engine");
        Ok(OpenSearchClient::connect(ConnectionConfig::new(
            url, username, password,
        ))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterSpec, GeneralConfig, SecretRef, SecurityConfig, SecurityConfigSpec};
    use crate::store::MockObjectStore;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn cluster(credentials: Option<&str>) -> OpenSearchCluster {
        let mut cluster = OpenSearchCluster::new(
            "logs",
            ClusterSpec {
                general: GeneralConfig {
                    service_name: "logs-api".to_string(),
                    http_port: 9200,
                    version: "2.11.0".to_string(),
                    ..Default::default()
                },
                security: credentials.map(|name| SecurityConfig {
                    config: Some(SecurityConfigSpec {
                        admin_credentials_secret: Some(SecretRef {
                            name: name.to_string(),
                        }),
                        ..Default::default()
                    }),
                    tls: None,
                }),
                ..Default::default()
            },
        );
        cluster.metadata.namespace = Some("search".to_string());
        cluster
    }

    fn connector() -> EngineConnector {
        EngineConnector::new(Arc::new(OperatorConfig::default()), None)
    }

    #[test]
    fn url_uses_service_and_dns_base() {
        assert_eq!(
            connector().url(&cluster(None)),
            "https://logs-api.search.svc.cluster.local:9200"
        );
    }

    #[tokio::test]
    async fn default_credentials_without_secret() {
        let k8s = K8s::new(Arc::new(MockObjectStore::new()));
        let creds = connector().credentials(&k8s, &cluster(None)).await.unwrap();
        assert_eq!(creds, ("admin".to_string(), "admin".to_string()));
    }

    #[tokio::test]
    async fn credentials_come_from_secret() {
        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some("logs-admin".to_string()),
                namespace: Some("search".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                ("username".to_string(), ByteString(b"ops".to_vec())),
                ("password".to_string(), ByteString(b"hunter2".to_vec())),
            ])),
            ..Default::default()
        };
        let obj: kube::api::DynamicObject =
            serde_json::from_value(serde_json::to_value(&secret).unwrap()).unwrap();
        let mut store = MockObjectStore::new();
        store.expect_get().returning(move |_| Ok(Some(obj.clone())));
        let k8s = K8s::new(Arc::new(store));

        let creds = connector()
            .credentials(&k8s, &cluster(Some("logs-admin")))
            .await
            .unwrap();
        assert_eq!(creds, ("ops".to_string(), "hunter2".to_string()));
    }

    #[tokio::test]
    async fn missing_credentials_secret_is_pending() {
        let mut store = MockObjectStore::new();
        store.expect_get().returning(|_| Ok(None));
        let k8s = K8s::new(Arc::new(store));

        let err = connector()
            .credentials(&k8s, &cluster(Some("logs-admin")))
            .await
            .unwrap_err();
        assert!(err.is_pending());
    }
}
