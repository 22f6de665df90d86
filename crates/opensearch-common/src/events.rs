//! Kubernetes Event recording for the operator's controllers.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so that reconcilers can emit standard Kubernetes Events visible via
//! `kubectl describe` and `kubectl get events`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "OpensearchPending")
    /// * `action` - What action was taken (e.g. "Reconcile")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher for the given controller name.
    ///
    /// The controller name appears as the "reportingComponent" on Events.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    // In-engine object reconciles
    /// Referenced cluster missing or not running yet
    pub const PENDING: &str = "OpensearchPending";
    /// Spec points at a different cluster than the one first bound
    pub const REF_MISMATCH: &str = "OpensearchRefMismatch";
    /// Engine admin API rejected a call
    pub const API_ERROR: &str = "OpensearchAPIError";
    /// Engine object created or updated
    pub const API_UPDATED: &str = "OpensearchAPIUpdated";
    /// Engine object already existed and is left untouched
    pub const ALREADY_EXISTS: &str = "OpensearchExisting";
    /// Engine-side name changed on an operator-created object
    pub const NAME_MISMATCH: &str = "OpensearchNameMismatch";
    /// Deferred status write failed
    pub const STATUS_UPDATE_ERROR: &str = "StatusUpdateError";
    /// User password secret could not be read
    pub const PASSWORD_ERROR: &str = "PasswordError";

    // Cluster lifecycle
    /// User config overrides an operator-managed key
    pub const CONFIG_DUPLICATE_KEY: &str = "ConfigDuplicateKey";
    /// Cluster formed and reachable
    pub const CLUSTER_INITIALIZED: &str = "ClusterInitialized";
    /// Node pool scaled
    pub const SCALER: &str = "Scaler";
    /// Rolling restart step
    pub const RESTART: &str = "Restart";
    /// Upgrade step or validation failure
    pub const UPGRADE: &str = "Upgrade";
    /// Security config applier job replaced
    pub const SECURITY: &str = "Security";
    /// Certificates issued
    pub const TLS: &str = "Tls";
    /// Snapshot repository created or updated
    pub const SNAPSHOT_REPOSITORY: &str = "SnapshotRepository";
    /// Stateful set recreated for a claim template change
    pub const VOLUME_EXPANSION: &str = "VolumeExpansion";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Engine object create/update
    pub const APPLY: &str = "Apply";
    /// Engine object or workload deletion
    pub const DELETE: &str = "Delete";
    /// Node pool replica change
    pub const SCALE: &str = "Scale";
    /// Pod replacement during a rollout
    pub const RESTART: &str = "Restart";
    /// Version change
    pub const UPGRADE: &str = "Upgrade";
    /// Status subresource write
    pub const UPDATE_STATUS: &str = "UpdateStatus";
}
