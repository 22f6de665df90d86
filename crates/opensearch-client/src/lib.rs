//! Admin REST client for OpenSearch
//!
//! Covers the endpoints the operator's reconcilers drive: cluster health
//! and settings, shard listing, the security plugin API, index, component
//! and search templates, ISM and snapshot management policies, and
//! snapshot repositories.

#![deny(missing_docs)]

mod client;
pub mod compare;
mod error;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use client::{
    OpenSearchClient, SecurityKind, ShardAllocation, ALLOCATION_ENABLE_SETTING,
    EXCLUDE_NAME_SETTING,
};
pub use error::ClientError;
pub use transport::{ConnectionConfig, EngineRequest, EngineResponse, HttpTransport, Method, Transport};
