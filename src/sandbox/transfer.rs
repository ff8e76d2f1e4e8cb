//! Depositing files into a sandbox workspace.
//!
//! Content is written into a tar archive inside a private staging directory
//! and handed to the engine as a single upload, so a reader in the sandbox
//! sees either the old file or the new one. The staging directory is a
//! `TempDir` owned by the call and disappears on every return path.

use bytes::Bytes;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::debug;

use super::error::SandboxError;
use super::registry::SandboxRef;
use super::runtime::ContainerRuntime;

const STAGING_PREFIX: &str = "codeagent-stage-";
const ARCHIVE_NAME: &str = "transfer.tar";
const FILE_MODE: u32 = 0o644;

/// Copies byte payloads into a sandbox's workspace.
pub(crate) struct MaterialTransfer {
    runtime: Arc<dyn ContainerRuntime>,
    workspace: String,
    timeout: Duration,
    staging_root: Option<PathBuf>,
}

impl MaterialTransfer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, workspace: String, timeout: Duration) -> Self {
        Self {
            runtime,
            workspace,
            timeout,
            staging_root: None,
        }
    }

    /// Stages archives under `root` instead of the system temp directory.
    #[cfg(test)]
    #[must_use]
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    /// Writes `content` to `dest_name` (relative to the workspace), replacing
    /// whatever was there.
    pub async fn deposit(
        &self,
        sandbox: &SandboxRef,
        content: &[u8],
        dest_name: &str,
    ) -> Result<(), SandboxError> {
        let dest = workspace_relative(dest_name)?;

        self.runtime
            .inspect(sandbox.name())
            .await
            .map_err(|e| SandboxError::from_engine(sandbox.name(), e))?;

        let staging = self.stage_dir()?;
        let archive = build_archive(staging.path(), &dest, content)?;

        let upload = self.runtime.upload(sandbox.name(), &self.workspace, archive);
        match tokio::time::timeout(self.timeout, upload).await {
            Ok(Ok(())) => {
                debug!(
                    "Deposited {} bytes at {}/{} in {}",
                    content.len(),
                    self.workspace,
                    dest,
                    sandbox
                );
                Ok(())
            }
            Ok(Err(e)) => Err(SandboxError::from_engine(sandbox.name(), e)),
            Err(_) => Err(SandboxError::timeout(self.timeout)),
        }
    }

    fn stage_dir(&self) -> Result<TempDir, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);
        let staged = match &self.staging_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        staged.map_err(|e| SandboxError::transfer_failed(format!("cannot create staging area: {e}")))
    }
}

/// Normalizes a destination to a forward-slash path inside the workspace.
///
/// Names starting with `-` are refused so a deposited program can never be
/// read as an interpreter option.
pub(crate) fn workspace_relative(dest_name: &str) -> Result<String, SandboxError> {
    let mut parts = Vec::new();
    for component in Path::new(dest_name).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SandboxError::invalid_input(format!(
                    "destination '{dest_name}' must stay inside the workspace"
                )));
            }
        }
    }
    match parts.first() {
        None => Err(SandboxError::invalid_input(format!(
            "destination '{dest_name}' does not name a file"
        ))),
        Some(first) if first.starts_with('-') => Err(SandboxError::invalid_input(format!(
            "destination '{dest_name}' must not start with '-'"
        ))),
        Some(_) => Ok(parts.join("/")),
    }
}

/// Writes a one-entry tar archive into `staging` and reads it back.
fn build_archive(staging: &Path, dest: &str, content: &[u8]) -> Result<Bytes, SandboxError> {
    let archive_path = staging.join(ARCHIVE_NAME);
    let staged = || -> std::io::Result<Vec<u8>> {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(FILE_MODE);
        header.set_mtime(
            u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default(),
        );
        header.set_entry_type(tar::EntryType::Regular);

        let mut builder = tar::Builder::new(File::create(&archive_path)?);
        builder.append_data(&mut header, dest, content)?;
        builder.into_inner()?.sync_all()?;
        fs::read(&archive_path)
    };

    staged()
        .map(Bytes::from)
        .map_err(|e| SandboxError::transfer_failed(format!("cannot build archive: {e}")))
}
