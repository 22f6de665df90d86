//! Reconcile stages, in the order the controller runs them

pub mod config;
pub mod dashboards;
pub mod nodes;
pub mod restart;
pub mod scaler;
pub mod security;
pub mod snapshots;
pub mod status;
pub mod tls;
pub mod upgrade;
