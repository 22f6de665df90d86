//! Error types for the OpenSearch operator
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant maps onto one error kind of the reconcile contract, and the kind
//! decides whether the controller requeues and how the owning resource's
//! status reflects the failure.

use std::time::Duration;

use opensearch_client::ClientError;
use thiserror::Error;

use crate::reconcile::{REQUEUE_PENDING, REQUEUE_STEADY};

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator reconciles
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A prerequisite is not ready yet (cluster missing, not running)
    #[error("pending [{resource}]: {message}")]
    Pending {
        /// Resource waiting on the prerequisite
        resource: String,
        /// What is being waited for
        message: String,
    },

    /// Network failure or engine 5xx
    #[error("transient error [{context}]: {message}")]
    Transient {
        /// Operation that failed
        context: String,
        /// Description of what failed
        message: String,
    },

    /// The engine rejected a request with a 4xx
    #[error("engine API error [{context}] (HTTP {status}): {message}")]
    Api {
        /// Operation that failed
        context: String,
        /// HTTP status code returned by the engine
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// The referenced cluster no longer matches the cluster first bound
    #[error("cluster reference mismatch for {resource}: bound to {expected}, found {found}")]
    RefMismatch {
        /// Resource holding the binding
        resource: String,
        /// UID stored in status.managedCluster
        expected: String,
        /// UID of the cluster the reference now resolves to
        found: String,
    },

    /// The engine-side name of an operator-created object changed
    #[error("name of {resource} cannot change from {previous} to {requested}")]
    NameMismatch {
        /// Resource being reconciled
        resource: String,
        /// Name recorded in status
        previous: String,
        /// Name derived from the current spec
        requested: String,
    },

    /// Validation error for CRD specs
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster or resource with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.general.version")
        field: Option<String>,
    },

    /// Optimistic concurrency retries exhausted on a status write
    #[error("status conflict for {resource}: {message}")]
    StatusConflict {
        /// Resource whose status could not be written
        resource: String,
        /// Description of the conflict
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Unexpected invariant break
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a pending error for a resource
    pub fn pending(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Pending {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a transient error with context
    pub fn transient(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transient {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this is an optimistic-concurrency loss
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::StatusConflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// Whether this is a 404 from the orchestrator
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404
        )
    }

    /// Check if this error is retryable
    ///
    /// RefMismatch, NameMismatch and Validation errors need the user to
    /// change the resource. Kubernetes 4xx errors other than conflicts and
    /// throttling are treated the same way.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 || ae.code == 429 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::Pending { .. } => true,
            Error::Transient { .. } => true,
            Error::Api { .. } => true,
            Error::RefMismatch { .. } => false,
            Error::NameMismatch { .. } => false,
            Error::Validation { .. } => false,
            Error::StatusConflict { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// How long the controller waits before the next attempt, if at all
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Error::Pending { .. } => Some(REQUEUE_PENDING),
            _ if self.is_retryable() => Some(REQUEUE_STEADY),
            _ => None,
        }
    }

    /// Pending errors are reported as Normal events and never as status errors
    pub fn is_pending(&self) -> bool {
        matches!(self, Error::Pending { .. })
    }

    /// Get the cluster name if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Validation { cluster, .. } => Some(cluster),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Transient { context, .. } => Some(context),
            Error::Api { context, .. } => Some(context),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Status {
                operation,
                status,
                body,
            } if (400..500).contains(&status) => Error::Api {
                context: operation,
                status,
                message: body,
            },
            ClientError::Status {
                operation,
                status,
                body,
            } => Error::Transient {
                context: operation,
                message: format!("HTTP {}: {}", status, body),
            },
            ClientError::Transport { operation, message } => Error::Transient {
                context: operation,
                message,
            },
            ClientError::Decode { operation, message } => Error::Serialization {
                message: format!("{}: {}", operation, message),
                kind: None,
            },
            ClientError::Config(message) => Error::internal_with_context("engine_client", message),
        }
    }
}
