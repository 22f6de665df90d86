//! Cluster lifecycle management for OpenSearch
//!
//! This crate provides the Kubernetes controller for OpenSearchCluster CRDs.
//! A reconcile runs a fixed sequence of stages (configuration, TLS,
//! security config, nodes, scaler, rolling restart, upgrade, snapshot
//! repositories, dashboards, status); each stage publishes volumes, mounts
//! and settings into a shared [`NodeSetup`] consumed by later stages.

pub mod controller;
pub mod names;
pub mod setup;

mod builders;
mod rollout;
mod stages;

#[cfg(test)]
mod test_support;

pub use controller::{error_policy, reconcile, Context};
pub use setup::NodeSetup;

pub use opensearch_common::{Error, Result};
