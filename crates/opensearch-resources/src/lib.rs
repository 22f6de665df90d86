//! Controllers for objects that live inside an OpenSearch cluster
//!
//! Users, roles, tenants, action groups, index, component and search
//! templates, ISM and snapshot management policies all follow the shared
//! contract in [`engine_object`]; each kind only supplies its payload, its
//! read and write calls and its equality test. User-role bindings merge
//! into shared role mappings and have their own reconcile in [`binding`].

pub mod binding;
pub mod context;
pub mod engine_object;
pub mod policies;
pub mod security;
pub mod templates;

mod body;

#[cfg(test)]
mod test_support;

pub use context::Context;
pub use engine_object::{error_policy, reconcile, EngineObject};

pub use opensearch_common::{Error, Result};
