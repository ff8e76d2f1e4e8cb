//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

use std::time::Duration;

use super::runtime::EngineError;

/// Errors that can occur during sandbox operations.
#[derive(Debug, thiserror::Error)]
pub(crate) enum SandboxError {
    /// The target sandbox does not exist.
    #[error("Sandbox '{name}' not found")]
    NotFound { name: String },

    /// The isolation runtime could not be reached or returned a protocol error.
    #[error("Container runtime is not available: {message}")]
    EnvironmentUnavailable { message: String },

    /// Building or staging the transfer archive failed on the host.
    #[error("Transfer failed: {message}")]
    TransferFailed { message: String },

    /// The operation exceeded its allowed duration.
    #[error("Operation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The host-side workspace directory could not be prepared.
    #[error("Workspace unavailable: {message}")]
    WorkspaceUnavailable { message: String },

    /// A caller-supplied identifier or path was rejected.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl SandboxError {
    /// Creates a `NotFound` error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates an `EnvironmentUnavailable` error.
    pub fn environment_unavailable(message: impl Into<String>) -> Self {
        Self::EnvironmentUnavailable {
            message: message.into(),
        }
    }

    /// Creates a `TransferFailed` error.
    pub fn transfer_failed(message: impl Into<String>) -> Self {
        Self::TransferFailed {
            message: message.into(),
        }
    }

    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            timeout_secs: duration.as_secs(),
        }
    }

    /// Creates a `WorkspaceUnavailable` error.
    pub fn workspace_unavailable(message: impl Into<String>) -> Self {
        Self::WorkspaceUnavailable {
            message: message.into(),
        }
    }

    /// Creates an `InvalidInput` error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Maps a runtime failure observed while addressing sandbox `name`.
    pub fn from_engine(name: &str, err: EngineError) -> Self {
        match err {
            EngineError::NotFound(_) => Self::not_found(name),
            other => Self::environment_unavailable(other.to_string()),
        }
    }

    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the runtime itself was unreachable.
    pub fn is_environment_unavailable(&self) -> bool {
        matches!(self, Self::EnvironmentUnavailable { .. })
    }
}
