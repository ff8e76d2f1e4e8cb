//! Per-user sandbox lifecycle.
//!
//! A user's sandbox is the container named `sandbox-<user_id>`. The registry
//! keeps no table of its own: the container engine is the source of truth,
//! so two registries pointed at the same daemon agree on what exists.

use anyhow::Context;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::docker::parse_memory_limit;
use super::error::SandboxError;
use super::executor::CodeExecutor;
use super::installer::DependencyInstaller;
use super::runtime::{ContainerRuntime, ContainerSpec, ContainerState, EngineError};
use super::transfer::MaterialTransfer;
use crate::config::SandboxConfig;

const NAME_PREFIX: &str = "sandbox-";
const MANAGED_LABEL: &str = "codeagent.managed";
const USER_LABEL: &str = "codeagent.user";
const MAX_USER_ID_LEN: usize = 64;

/// Container name for a user's sandbox.
pub(crate) fn sandbox_name(user_id: &str) -> String {
    format!("{NAME_PREFIX}{user_id}")
}

/// Handle naming one sandbox. Holds no connection of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SandboxRef {
    name: String,
}

impl SandboxRef {
    /// Refers to a sandbox by container name, e.g. one a model passed back.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn for_user(user_id: &str) -> Self {
        Self::named(sandbox_name(user_id))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for SandboxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Whether `ensure` had to instantiate a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Provision {
    Created,
    AlreadyExists,
}

/// Result of [`SandboxRegistry::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Provisioned {
    pub sandbox: SandboxRef,
    /// Engine-assigned container id.
    pub id: String,
    pub provision: Provision,
}

impl fmt::Display for Provisioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provision {
            Provision::Created => write!(f, "Created container {}", self.sandbox),
            Provision::AlreadyExists => write!(f, "Container {} already exists", self.sandbox),
        }
    }
}

/// Result of [`SandboxRegistry::remove`]. A missing sandbox is reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RemoveStatus {
    Removed(String),
    NotFound(String),
}

impl fmt::Display for RemoveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Removed(name) => write!(f, "Removed container {name}"),
            Self::NotFound(name) => write!(f, "Container {name} not found"),
        }
    }
}

/// Observed state of a user's sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SandboxStatus {
    Running { id: String },
    Stopped { id: String },
    Absent,
}

/// Creates, finds and destroys per-user sandboxes.
///
/// Owns the runtime handle and lends it to the transfer, installer and
/// executor components it builds.
pub(crate) struct SandboxRegistry {
    runtime: Arc<dyn ContainerRuntime>,
    settings: SandboxConfig,
    memory_bytes: i64,
    interpreter: Vec<String>,
}

impl SandboxRegistry {
    /// Validates `settings` and wraps the runtime handle.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: SandboxConfig) -> anyhow::Result<Self> {
        let memory_bytes = parse_memory_limit(&settings.memory)
            .with_context(|| format!("Invalid sandbox memory limit: {}", settings.memory))?;
        let interpreter = settings.interpreter_argv()?;
        for (key, secs) in [
            ("exec_timeout_secs", settings.exec_timeout_secs),
            ("install_timeout_secs", settings.install_timeout_secs),
            ("transfer_timeout_secs", settings.transfer_timeout_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("sandbox.{key} must be at least 1 second");
            }
        }
        Ok(Self {
            runtime,
            settings,
            memory_bytes,
            interpreter,
        })
    }

    /// Returns the user's sandbox, creating it on first use.
    ///
    /// Only an unreachable runtime (or an unusable host workspace) is an
    /// error; an existing sandbox is reported as [`Provision::AlreadyExists`].
    pub async fn ensure(&self, user_id: &str) -> Result<Provisioned, SandboxError> {
        validate_user_id(user_id)?;
        let name = sandbox_name(user_id);

        match self.runtime.inspect(&name).await {
            Ok(state) => return self.adopt(&name, state).await,
            Err(EngineError::NotFound(_)) => debug!("No sandbox for {}, creating {}", user_id, name),
            Err(e) => return Err(SandboxError::environment_unavailable(e.to_string())),
        }

        let spec = self.container_spec(user_id, &name)?;
        std::fs::create_dir_all(&spec.host_dir).map_err(|e| {
            SandboxError::workspace_unavailable(format!("{}: {e}", spec.host_dir.display()))
        })?;

        if self.settings.pull_missing_image {
            self.runtime
                .ensure_image(&spec.image)
                .await
                .map_err(|e| SandboxError::environment_unavailable(e.to_string()))?;
        }

        match self.runtime.create(&spec).await {
            Ok(id) => {
                info!(
                    event = "sandbox_created",
                    sandbox = %name,
                    image = %spec.image,
                    memory_bytes = spec.memory_bytes,
                    host_dir = %spec.host_dir.display(),
                );
                Ok(Provisioned {
                    sandbox: SandboxRef::named(name),
                    id,
                    provision: Provision::Created,
                })
            }
            Err(e) if e.is_conflict() => {
                // Another caller created it between our lookup and create
                debug!("Sandbox {} appeared concurrently, adopting it", name);
                let state = self
                    .runtime
                    .inspect(&name)
                    .await
                    .map_err(|e| SandboxError::environment_unavailable(e.to_string()))?;
                self.adopt(&name, state).await
            }
            Err(e) => Err(SandboxError::environment_unavailable(e.to_string())),
        }
    }

    /// Force-removes the user's sandbox whatever its state.
    pub async fn remove(&self, user_id: &str) -> Result<RemoveStatus, SandboxError> {
        validate_user_id(user_id)?;
        let name = sandbox_name(user_id);

        match self.runtime.remove(&name).await {
            Ok(()) => {
                info!(event = "sandbox_removed", sandbox = %name);
                Ok(RemoveStatus::Removed(name))
            }
            Err(EngineError::NotFound(_)) => {
                debug!("Nothing to remove for {}", name);
                Ok(RemoveStatus::NotFound(name))
            }
            Err(e) => Err(SandboxError::environment_unavailable(e.to_string())),
        }
    }

    pub async fn status(&self, user_id: &str) -> Result<SandboxStatus, SandboxError> {
        validate_user_id(user_id)?;
        match self.runtime.inspect(&sandbox_name(user_id)).await {
            Ok(ContainerState { id, running: true }) => Ok(SandboxStatus::Running { id }),
            Ok(ContainerState { id, running: false }) => Ok(SandboxStatus::Stopped { id }),
            Err(EngineError::NotFound(_)) => Ok(SandboxStatus::Absent),
            Err(e) => Err(SandboxError::environment_unavailable(e.to_string())),
        }
    }

    pub fn transfer(&self) -> MaterialTransfer {
        MaterialTransfer::new(
            Arc::clone(&self.runtime),
            self.settings.workspace.clone(),
            self.settings.transfer_timeout(),
        )
    }

    pub fn installer(&self) -> DependencyInstaller {
        DependencyInstaller::new(
            Arc::clone(&self.runtime),
            self.settings.workspace.clone(),
            self.settings.install_timeout(),
        )
    }

    pub fn executor(&self) -> CodeExecutor {
        CodeExecutor::new(
            Arc::clone(&self.runtime),
            self.settings.workspace.clone(),
            self.interpreter.clone(),
            self.settings.exec_timeout(),
        )
    }

    /// Reports an existing sandbox, restarting it if it was stopped.
    async fn adopt(&self, name: &str, state: ContainerState) -> Result<Provisioned, SandboxError> {
        if !state.running {
            info!(event = "sandbox_restarted", sandbox = %name);
            self.runtime
                .start(name)
                .await
                .map_err(|e| SandboxError::environment_unavailable(e.to_string()))?;
        }
        Ok(Provisioned {
            sandbox: SandboxRef::named(name),
            id: state.id,
            provision: Provision::AlreadyExists,
        })
    }

    fn container_spec(&self, user_id: &str, name: &str) -> Result<ContainerSpec, SandboxError> {
        let host_root = self
            .settings
            .host_root_path()
            .map_err(|e| SandboxError::workspace_unavailable(e.to_string()))?;

        Ok(ContainerSpec {
            name: name.to_string(),
            image: self.settings.image.clone(),
            cmd: vec!["tail".into(), "-f".into(), "/dev/null".into()],
            host_dir: host_dir(&host_root, user_id),
            workspace: self.settings.workspace.clone(),
            memory_bytes: self.memory_bytes,
            labels: HashMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (USER_LABEL.to_string(), user_id.to_string()),
            ]),
        })
    }
}

fn host_dir(host_root: &std::path::Path, user_id: &str) -> PathBuf {
    host_root.join(user_id)
}

/// User ids become part of a container name and a host directory name.
fn validate_user_id(user_id: &str) -> Result<(), SandboxError> {
    let valid = !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id.starts_with(|c: char| c.is_ascii_alphanumeric())
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if valid {
        Ok(())
    } else {
        Err(SandboxError::invalid_input(format!(
            "user id '{user_id}' must be 1-{MAX_USER_ID_LEN} characters of [A-Za-z0-9_.-] starting with a letter or digit"
        )))
    }
}
