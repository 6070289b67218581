//! Error types for the replica-set bootstrapper.

use thiserror::Error;

/// Errors raised while probing and reconfiguring a replica set.
#[derive(Error, Debug)]
pub enum InitError {
    /// Connection, server-selection, or authentication failure while
    /// reaching a member. Fatal: there is no server to talk to.
    #[error("admin connection failed during {operation}: {message}")]
    Admin { operation: String, message: String },

    /// The server rejected an admin command. Retryable only where the
    /// caller knows the state it is waiting on settles by itself.
    #[error("{operation} failed with code {code}: {message}")]
    CommandFailed {
        operation: String,
        code: i32,
        message: String,
    },

    /// DNS resolution of a member address did not succeed within the retry
    /// budget.
    #[error("failed to resolve '{host}'")]
    Resolve { host: String },

    /// The bootstrap configuration itself is unusable.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl InitError {
    pub fn admin(operation: impl Into<String>, message: impl Into<String>) -> Self {
        InitError::Admin {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn command_failed(
        operation: impl Into<String>,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        InitError::CommandFailed {
            operation: operation.into(),
            code,
            message: message.into(),
        }
    }

    pub fn resolve(host: impl Into<String>) -> Self {
        InitError::Resolve { host: host.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        InitError::Config {
            message: message.into(),
        }
    }

    /// True for server-side command rejections, the only class worth
    /// retrying while a just-initiated set settles.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, InitError::CommandFailed { .. })
    }
}

pub type InitResult<T> = Result<T, InitError>;
