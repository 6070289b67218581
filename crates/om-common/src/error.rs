//! Error types for Ops Manager reconciliation.
//!
//! All errors implement `std::error::Error` via `thiserror`. Contention is
//! the only condition handled internally (by the transport client's retry
//! loop); everything else propagates to the caller and aborts the attempt.

use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type OmResult<T> = Result<T, OmError>;

/// Errors that can occur while reconciling a deployment against Ops Manager.
#[derive(Debug, Error)]
pub enum OmError {
    /// Invalid or missing required input. Fatal, never retried.
    #[error("Invalid configuration for {field}: {message}")]
    Configuration {
        /// The parameter or field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Non-success HTTP status from the management plane (other than
    /// contention). Fatal, surfaced with status and body.
    #[error("{method} {endpoint} returned {status}: {body}")]
    Remote {
        /// HTTP method of the failed request.
        method: String,
        /// API endpoint (path below the public API base).
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body, JSON or plain text.
        body: String,
    },

    /// Optimistic-concurrency conflict: another writer updated the shared
    /// document between our read and write. Retried internally; becomes
    /// [`OmError::Remote`] only after the retry bound is exhausted.
    #[error("Configuration write contention on {endpoint}: {body}")]
    Contention {
        /// API endpoint that reported the conflict.
        endpoint: String,
        /// Response body describing the conflict.
        body: String,
    },

    /// A required local resource (e.g. the installed automation agent) is
    /// absent. Fatal.
    #[error("Missing local dependency: {message}")]
    MissingDependency {
        /// Error message.
        message: String,
    },

    /// Connection-level transport failure (DNS, TLS, timeout).
    #[error("Transport failure for {endpoint}: {message}")]
    Transport {
        /// Target URL or endpoint.
        endpoint: String,
        /// Error message.
        message: String,
    },

    /// Local filesystem failure (audit snapshot, certificate files).
    #[error("I/O failure on {path}: {source}")]
    Io {
        /// The path involved.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failure at the transport boundary.
    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OmError {
    /// Creates a configuration error.
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a remote error from an HTTP response.
    pub fn remote(
        method: impl Into<String>,
        endpoint: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Self::Remote {
            method: method.into(),
            endpoint: endpoint.into(),
            status,
            body: body.into(),
        }
    }

    /// Creates a contention error.
    pub fn contention(endpoint: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Contention {
            endpoint: endpoint.into(),
            body: body.into(),
        }
    }

    /// Creates a missing dependency error.
    pub fn missing_dependency(message: impl Into<String>) -> Self {
        Self::MissingDependency {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error is an optimistic-concurrency conflict
    /// that the transport client may retry.
    pub fn is_contention(&self) -> bool {
        matches!(self, OmError::Contention { .. })
    }
}
