//! CLI command implementations.
//!
//! Each submodule implements one codeagent subcommand. Commands that touch
//! sandboxes share [`connect_registry`].

pub mod ask;
pub mod exec;
pub mod init;
pub mod install;
pub mod sandbox;
pub mod search;
pub mod tools;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::sandbox::{DockerRuntime, SandboxError, SandboxRegistry};

/// Connects to the local Docker daemon and builds the sandbox registry.
pub(crate) async fn connect_registry(config: &Config) -> Result<SandboxRegistry> {
    let runtime = DockerRuntime::connect()
        .await
        .map_err(|e| SandboxError::environment_unavailable(e.to_string()))
        .context("Failed to connect to Docker")?;
    SandboxRegistry::new(Arc::new(runtime), config.sandbox.clone())
}

/// Adds the next step to sandbox failures a user can act on.
pub(crate) fn explain(err: SandboxError, user_id: &str) -> anyhow::Error {
    if err.is_not_found() {
        anyhow::anyhow!("{err}. Run `codeagent sandbox up --user {user_id}` first")
    } else if err.is_environment_unavailable() {
        anyhow::anyhow!("{err}. Is the Docker daemon running?")
    } else {
        err.into()
    }
}
