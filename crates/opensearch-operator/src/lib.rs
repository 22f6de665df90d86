//! OpenSearch Kubernetes operator

#![deny(missing_docs)]

/// Controller construction for every watched kind
pub mod controller_runner;
/// Startup utilities (CRD install)
pub mod startup;
