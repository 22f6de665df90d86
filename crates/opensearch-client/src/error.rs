//! Error type of the engine client

use thiserror::Error;

/// Failure of one engine API call
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response
    #[error("{operation}: transport error: {message}")]
    Transport {
        /// Operation that failed
        operation: String,
        /// Underlying cause
        message: String,
    },

    /// The engine answered with a non-success status
    #[error("{operation}: HTTP {status}: {body}")]
    Status {
        /// Operation that failed
        operation: String,
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The response body did not have the expected shape
    #[error("{operation}: unexpected response: {message}")]
    Decode {
        /// Operation that failed
        operation: String,
        /// What did not parse
        message: String,
    },

    /// The client could not be built
    #[error("client configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// HTTP status of a rejected request
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the engine reported the object missing
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Whether an optimistic-concurrency guard failed
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    pub(crate) fn decode(operation: &str, message: impl std::fmt::Display) -> Self {
        ClientError::Decode {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}
