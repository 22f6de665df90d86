//! Names of the objects derived from a cluster

/// Label the stateful set controller puts on every pod
pub const REVISION_LABEL: &str = "controller-revision-hash";

/// Pod template annotation carrying the SHA-1 of the rendered opensearch.yml
pub const CONFIG_ANNOTATION: &str = "opster.io/config";

/// Label on cluster-manager eligible pods; selected by the discovery service
pub const MANAGER_LABEL: &str = "opster.io/opensearch-manager";

/// Stateful set (and headless service) of a node pool
pub fn statefulset(cluster: &str, pool: &str) -> String {
    format!("{}-{}", cluster, pool)
}

/// Pod with the given ordinal of a node pool
pub fn pod(cluster: &str, pool: &str, ordinal: i32) -> String {
    format!("{}-{}-{}", cluster, pool, ordinal)
}

/// Single-node pod that forms the cluster
pub fn bootstrap_pod(cluster: &str) -> String {
    format!("{}-bootstrap-0", cluster)
}

/// Headless service used for discovery seed hosts
pub fn discovery_service(cluster: &str) -> String {
    format!("{}-discovery", cluster)
}

/// Config map holding opensearch.yml
pub fn config_map(cluster: &str) -> String {
    format!("{}-config", cluster)
}

/// Pod disruption budget of a node pool
pub fn pdb(cluster: &str, pool: &str) -> String {
    format!("{}-{}-pdb", cluster, pool)
}

/// Secret holding the generated CA
pub fn ca_secret(cluster: &str) -> String {
    format!("{}-ca", cluster)
}

/// Secret holding generated certificates for an interface
pub fn cert_secret(cluster: &str, interface: &str) -> String {
    format!("{}-{}-cert", cluster, interface)
}

/// Secret holding the generated admin client certificate
pub fn admin_cert_secret(cluster: &str) -> String {
    cert_secret(cluster, "admin")
}

/// Job applying the security config documents
pub fn security_job(cluster: &str) -> String {
    format!("{}-securityconfig-update", cluster)
}

/// Dashboards deployment and service
pub fn dashboards(cluster: &str) -> String {
    format!("{}-dashboards", cluster)
}

/// Config map holding opensearch_dashboards.yml
pub fn dashboards_config(cluster: &str) -> String {
    format!("{}-dashboards-config", cluster)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_names() {
        assert_eq!(statefulset("logs", "data"), "logs-data");
        assert_eq!(pod("logs", "data", 2), "logs-data-2");
        assert_eq!(bootstrap_pod("logs"), "logs-bootstrap-0");
        assert_eq!(cert_secret("logs", "transport"), "logs-transport-cert");
        assert_eq!(admin_cert_secret("logs"), "logs-admin-cert");
        assert_eq!(security_job("logs"), "logs-securityconfig-update");
    }
}
