//! Shared types for the OpenSearch operator: CRDs, errors, orchestrator
//! access, engine connection, events, metrics and telemetry

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod engine;
pub mod error;
pub mod events;
pub mod k8s;
pub mod kube_utils;
pub mod metrics;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of every operator CRD
pub const API_GROUP: &str = "opensearch.opster.io";
