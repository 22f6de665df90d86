//! Metrics registry for the operator
//!
//! Gauges are registered once on the global meter. Until an OTLP endpoint is
//! configured the global meter provider is a no-op, so recording is always
//! safe.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, KeyValue};

use opensearch_client::types::{ClusterHealth, HealthStatus};

static METER: Lazy<Meter> = Lazy::new(|| global::meter("opensearch-operator"));

/// Days until a generated certificate expires
///
/// Labels:
/// - `cluster`: cluster name
/// - `interface`: transport, http, admin, ca, dashboards
pub static TLS_CERTIFICATE_REMAINING_DAYS: Lazy<Gauge<f64>> = Lazy::new(|| {
    METER
        .f64_gauge("tls_certificate_remaining_days")
        .with_description("Days until the certificate expires")
        .with_unit("d")
        .build()
});

/// Constant 1, labelled with the observed version
///
/// Labels:
/// - `cluster`: cluster name
/// - `version`: engine version reported in status
pub static CLUSTER_INFO: Lazy<Gauge<u64>> = Lazy::new(|| {
    METER
        .u64_gauge("cluster_info")
        .with_description("Cluster information")
        .build()
});

/// Engine health: 0 green, 1 yellow, 2 red
///
/// Labels:
/// - `cluster`: cluster name
pub static CLUSTER_HEALTH: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("cluster_health")
        .with_description("Cluster health (0 green, 1 yellow, 2 red)")
        .build()
});

/// Active shards
pub static SHARDS_ACTIVE: Lazy<Gauge<i64>> = Lazy::new(|| shard_gauge("shards_active"));
/// Relocating shards
pub static SHARDS_RELOCATING: Lazy<Gauge<i64>> = Lazy::new(|| shard_gauge("shards_relocating"));
/// Initializing shards
pub static SHARDS_INITIALIZING: Lazy<Gauge<i64>> =
    Lazy::new(|| shard_gauge("shards_initializing"));
/// Unassigned shards
pub static SHARDS_UNASSIGNED: Lazy<Gauge<i64>> = Lazy::new(|| shard_gauge("shards_unassigned"));

/// Histogram of reconcile duration
///
/// Labels:
/// - `kind`: resource kind
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("opensearch_operator_reconcile_duration_seconds")
        .with_description("Duration of reconciles in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconcile errors
///
/// Labels:
/// - `kind`: resource kind
/// - `retryable`: true, false
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("opensearch_operator_reconcile_errors_total")
        .with_description("Total number of reconcile errors")
        .with_unit("{errors}")
        .build()
});

fn shard_gauge(name: &'static str) -> Gauge<i64> {
    METER
        .i64_gauge(name)
        .with_description("Shard count by state")
        .with_unit("{shards}")
        .build()
}

/// Numeric encoding used by the `cluster_health` gauge
pub fn health_value(status: HealthStatus) -> i64 {
    match status {
        HealthStatus::Green => 0,
        HealthStatus::Yellow => 1,
        HealthStatus::Red => 2,
    }
}

/// Refresh health and shard gauges from a health response
pub fn record_cluster_health(cluster: &str, health: &ClusterHealth) {
    let labels = [KeyValue::new("cluster", cluster.to_string())];
    CLUSTER_HEALTH.record(health_value(health.status), &labels);
    SHARDS_ACTIVE.record(health.active_shards, &labels);
    SHARDS_RELOCATING.record(health.relocating_shards, &labels);
    SHARDS_INITIALIZING.record(health.initializing_shards, &labels);
    SHARDS_UNASSIGNED.record(health.unassigned_shards, &labels);
}

/// Record the observed version
pub fn record_cluster_info(cluster: &str, version: &str) {
    CLUSTER_INFO.record(
        1,
        &[
            KeyValue::new("cluster", cluster.to_string()),
            KeyValue::new("version", version.to_string()),
        ],
    );
}

/// Record days remaining on a certificate
pub fn record_certificate_expiry(cluster: &str, interface: &str, remaining_secs: i64) {
    TLS_CERTIFICATE_REMAINING_DAYS.record(
        remaining_secs as f64 / 86_400.0,
        &[
            KeyValue::new("cluster", cluster.to_string()),
            KeyValue::new("interface", interface.to_string()),
        ],
    );
}

/// Record a finished reconcile
pub fn record_reconcile(kind: &'static str, seconds: f64, error: Option<bool>) {
    let result = if error.is_some() { "error" } else { "success" };
    RECONCILE_DURATION.record(
        seconds,
        &[KeyValue::new("kind", kind), KeyValue::new("result", result)],
    );
    if let Some(retryable) = error {
        RECONCILE_ERRORS.add(
            1,
            &[
                KeyValue::new("kind", kind),
                KeyValue::new("retryable", retryable.to_string()),
            ],
        );
    }
}
