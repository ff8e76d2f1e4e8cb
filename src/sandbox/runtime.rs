//! Seam between the sandbox components and the container engine.
//!
//! The registry owns one `Arc<dyn ContainerRuntime>` and hands clones of it
//! to the transfer, installer and executor components. Production code uses
//! [`super::DockerRuntime`]; tests substitute an in-memory fake.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Failure reported by the container engine, before it is mapped into
/// [`super::SandboxError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum EngineError {
    /// The addressed container, image or exec instance does not exist.
    #[error("no such object: {0}")]
    NotFound(String),

    /// The engine could not be reached (socket, IO, request timeout).
    #[error("engine unreachable: {0}")]
    Unreachable(String),

    /// The engine answered with an error status.
    #[error("engine API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl EngineError {
    /// Returns true for a 409 conflict, e.g. a container name already in use.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Api { status: 409, .. })
    }
}

/// Observed state of a named container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerState {
    /// Engine-assigned identifier.
    pub id: String,
    /// Whether the main process is running.
    pub running: bool,
}

/// Everything needed to instantiate a sandbox container.
#[derive(Debug, Clone)]
pub(crate) struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Long-lived foreground process keeping the container alive.
    pub cmd: Vec<String>,
    /// Host directory bind-mounted read-write at `workspace`.
    pub host_dir: PathBuf,
    pub workspace: String,
    pub memory_bytes: i64,
    pub labels: HashMap<String, String>,
}

/// A command to run inside an existing container.
#[derive(Debug, Clone)]
pub(crate) struct ExecSpec {
    pub cmd: Vec<String>,
    pub working_dir: String,
    /// Extra `KEY=value` environment entries for the process.
    pub env: Vec<String>,
    /// Upper bound on wall-clock run time. `None` means unbounded.
    pub timeout: Option<Duration>,
}

/// Result of an exec that reached the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExecOutput {
    /// Exit status, absent when the process was abandoned at the deadline.
    pub exit_code: Option<i64>,
    /// Combined stdout and stderr in arrival order.
    pub output: String,
    pub timed_out: bool,
}

/// Operations the sandbox subsystem needs from a container engine.
#[async_trait]
pub(crate) trait ContainerRuntime: Send + Sync {
    /// Checks the engine is reachable.
    async fn ping(&self) -> Result<(), EngineError>;

    /// Looks up a container by name.
    async fn inspect(&self, name: &str) -> Result<ContainerState, EngineError>;

    /// Makes sure `image` is present locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<(), EngineError>;

    /// Creates and starts a container, returning its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Starts an existing, stopped container.
    async fn start(&self, name: &str) -> Result<(), EngineError>;

    /// Force-removes a container regardless of its state.
    async fn remove(&self, name: &str) -> Result<(), EngineError>;

    /// Runs a command inside a running container.
    async fn exec(&self, name: &str, spec: &ExecSpec) -> Result<ExecOutput, EngineError>;

    /// Extracts a tar archive into `dest_dir` inside the container.
    async fn upload(&self, name: &str, dest_dir: &str, archive: Bytes) -> Result<(), EngineError>;
}
