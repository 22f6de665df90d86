//! Startup utilities for the OpenSearch operator

mod crds;

pub use crds::{crd_manifests, ensure_crds_installed};
