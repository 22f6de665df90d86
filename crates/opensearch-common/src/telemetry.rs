//! Telemetry initialization for tracing and metrics
//!
//! Structured logs (JSON by default, pretty for local runs) always; OTLP
//! export of traces and metrics when an endpoint is configured. Every
//! exported signal carries the operator's service name, version and the
//! namespace and pod it runs in.

use clap::{Args, ValueEnum};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when neither `--log-filter` nor `RUST_LOG` is set
pub const DEFAULT_LOG_FILTER: &str = "info,opensearch=debug,kube=info,tower=warn,hyper=warn";

/// Service name reported in traces, metrics and logs
pub const SERVICE_NAME: &str = "opensearch-operator";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize OpenTelemetry tracer
    #[error("failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize OTLP metrics exporter
    #[error("failed to initialize metrics exporter: {0}")]
    MetricsInit(String),

    /// Log filter directives do not parse
    #[error("invalid log filter {filter:?}: {message}")]
    InvalidFilter {
        /// The rejected directives
        filter: String,
        /// Parser message
        message: String,
    },

    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Log line format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line, for log collectors
    #[default]
    Json,
    /// Multi-line human readable output
    Pretty,
}

/// Telemetry settings
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name for traces and metrics
    #[arg(skip = SERVICE_NAME.to_string())]
    pub service_name: String,

    /// Log line format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Log filter directives; RUST_LOG is used when unset
    #[arg(long, env = "LOG_FILTER")]
    pub log_filter: Option<String>,

    /// OTLP endpoint for trace and metric export (e.g. "http://otel-collector:4317").
    /// Only local logs are produced when unset.
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Namespace the operator runs in, from the downward API
    #[arg(long, env = "POD_NAMESPACE")]
    pub operator_namespace: Option<String>,

    /// Pod the operator runs in, from the downward API
    #[arg(long, env = "POD_NAME", hide = true)]
    pub pod_name: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME.to_string(),
            log_format: LogFormat::Json,
            log_filter: None,
            otlp_endpoint: None,
            operator_namespace: None,
            pod_name: None,
        }
    }
}

impl TelemetryConfig {
    /// Filter directives in effect: the explicit filter, then `rust_log`, then the default
    pub fn filter_directives(&self, rust_log: Option<String>) -> String {
        self.log_filter
            .clone()
            .or(rust_log)
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    }

    fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        let directives = self.filter_directives(std::env::var(EnvFilter::DEFAULT_ENV).ok());
        EnvFilter::try_new(&directives).map_err(|e| TelemetryError::InvalidFilter {
            filter: directives,
            message: e.to_string(),
        })
    }
}

/// Install the global subscriber, propagator and (optionally) OTLP exporters
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let env_filter = config.env_filter()?;
    let resource = Resource::new(resource_attributes(config));

    let otel_layer = if let Some(endpoint) = &config.otlp_endpoint {
        init_otlp_metrics(endpoint, resource.clone())?;
        let provider = init_otlp_tracer(endpoint, resource)?;
        let tracer = provider.tracer(config.service_name.clone());
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let (json_layer, pretty_layer) = match config.log_format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        ),
        LogFormat::Pretty => (None, Some(tracing_subscriber::fmt::layer().pretty())),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    Ok(())
}

fn resource_attributes(config: &TelemetryConfig) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
    ];
    if let Some(namespace) = &config.operator_namespace {
        attributes.push(KeyValue::new("k8s.namespace.name", namespace.clone()));
    }
    if let Some(pod) = &config.pod_name {
        attributes.push(KeyValue::new("k8s.pod.name", pod.clone()));
    }
    attributes
}

fn init_otlp_tracer(endpoint: &str, resource: Resource) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());

    Ok(provider)
}

fn init_otlp_metrics(endpoint: &str, resource: Resource) -> Result<(), TelemetryError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let reader =
        opentelemetry_sdk::metrics::PeriodicReader::builder(exporter, runtime::Tokio).build();

    let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();

    global::set_meter_provider(meter_provider);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        telemetry: TelemetryConfig,
    }

    fn attribute(attributes: &[KeyValue], key: &str) -> Option<String> {
        attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }

    #[test]
    fn flags_select_format_and_filter() {
        let cli = TestCli::parse_from([
            "test",
            "--log-format",
            "pretty",
            "--log-filter",
            "opensearch_cluster=trace",
            "--operator-namespace",
            "opensearch-system",
        ]);
        assert_eq!(cli.telemetry.service_name, SERVICE_NAME);
        assert_eq!(cli.telemetry.log_format, LogFormat::Pretty);
        assert_eq!(
            cli.telemetry.filter_directives(Some("warn".to_string())),
            "opensearch_cluster=trace"
        );
        assert_eq!(cli.telemetry.operator_namespace.as_deref(), Some("opensearch-system"));
    }

    #[test]
    fn filter_falls_back_to_rust_log_then_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.filter_directives(Some("debug".to_string())), "debug");
        assert_eq!(config.filter_directives(Some(" ".to_string())), DEFAULT_LOG_FILTER);
        assert_eq!(config.filter_directives(None), DEFAULT_LOG_FILTER);
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn resource_identifies_the_operator_deployment() {
        let config = TelemetryConfig {
            operator_namespace: Some("opensearch-system".to_string()),
            pod_name: Some("opensearch-operator-7d9f".to_string()),
            ..Default::default()
        };
        let attributes = resource_attributes(&config);
        assert_eq!(
            attribute(&attributes, "service.name").as_deref(),
            Some("opensearch-operator")
        );
        assert_eq!(
            attribute(&attributes, "service.version").as_deref(),
            Some(env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(
            attribute(&attributes, "k8s.namespace.name").as_deref(),
            Some("opensearch-system")
        );
        assert_eq!(
            attribute(&attributes, "k8s.pod.name").as_deref(),
            Some("opensearch-operator-7d9f")
        );
    }

    #[test]
    fn resource_omits_unknown_location() {
        let attributes = resource_attributes(&TelemetryConfig::default());
        assert_eq!(attribute(&attributes, "k8s.namespace.name"), None);
        assert_eq!(attributes.len(), 2);
    }
}
