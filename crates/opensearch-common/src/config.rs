//! Process-wide operator configuration
//!
//! Built once at startup from flags and environment and handed to every
//! controller context. Reconcilers never read the environment themselves.

use std::time::Duration;

use clap::Args;

/// Default cluster DNS suffix
pub const DEFAULT_DNS_BASE: &str = "cluster.local";

/// Operator configuration
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Cluster DNS suffix used in service hostnames and certificate SANs
    #[arg(long, env = "DNS_BASE", default_value = DEFAULT_DNS_BASE)]
    pub dns_base: String,

    /// Start node pool pods in parallel instead of one at a time
    #[arg(
        long,
        env = "PARALLEL_RECOVERY_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub parallel_recovery_enabled: bool,

    /// Restrict every controller to a single namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Concurrent reconciles per resource kind
    #[arg(long, env = "RECONCILE_WORKERS", default_value_t = 1)]
    pub reconcile_workers: u16,

    /// Deadline for a single reconcile, in seconds
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value_t = 120)]
    pub reconcile_timeout_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            dns_base: DEFAULT_DNS_BASE.to_string(),
            parallel_recovery_enabled: true,
            watch_namespace: None,
            reconcile_workers: 1,
            reconcile_timeout_secs: 120,
        }
    }
}

impl OperatorConfig {
    /// Per-reconcile deadline
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Fully qualified in-cluster hostname of a service
    pub fn service_host(&self, service: &str, namespace: &str) -> String {
        format!("{}.{}.svc.{}", service, namespace, self.dns_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: OperatorConfig,
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = TestCli::parse_from(["test"]);
        assert_eq!(cli.config, OperatorConfig::default());
        assert!(cli.config.parallel_recovery_enabled);
        assert_eq!(cli.config.reconcile_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::parse_from([
            "test",
            "--dns-base",
            "corp.internal",
            "--parallel-recovery-enabled",
            "false",
            "--watch-namespace",
            "search",
        ]);
        assert_eq!(cli.config.dns_base, "corp.internal");
        assert!(!cli.config.parallel_recovery_enabled);
        assert_eq!(cli.config.watch_namespace.as_deref(), Some("search"));
    }

    #[test]
    fn service_host_uses_dns_base() {
        let config = OperatorConfig::default();
        assert_eq!(
            config.service_host("logs", "search"),
            "logs.search.svc.cluster.local"
        );
    }
}
