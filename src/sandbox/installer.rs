//! Per-package dependency installation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::error::SandboxError;
use super::registry::SandboxRef;
use super::runtime::{ContainerRuntime, ExecSpec};

const PIP_INSTALL: &[&str] = &[
    "pip",
    "install",
    "--no-cache-dir",
    "--no-input",
    "--disable-pip-version-check",
];

/// How installing one package ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PackageOutcome {
    Installed,
    /// Failed, with the package manager's condensed output.
    Failed { output: String },
    TimedOut { after_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PackageResult {
    pub package: String,
    pub outcome: PackageOutcome,
}

impl PackageResult {
    pub fn is_installed(&self) -> bool {
        self.outcome == PackageOutcome::Installed
    }
}

impl fmt::Display for PackageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            PackageOutcome::Installed => write!(f, "✓ Successfully installed {}", self.package),
            PackageOutcome::Failed { output } => {
                write!(f, "✗ Failed to install {}: {}", self.package, output)
            }
            PackageOutcome::TimedOut { after_secs } => write!(
                f,
                "✗ Timed out installing {} after {} seconds",
                self.package, after_secs
            ),
        }
    }
}

/// One result per requested package, in request order.
///
/// Displays as one status line per package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct InstallReport {
    results: Vec<PackageResult>,
}

impl InstallReport {
    pub fn results(&self) -> &[PackageResult] {
        &self.results
    }

    pub fn failures(&self) -> impl Iterator<Item = &PackageResult> {
        self.results.iter().filter(|r| !r.is_installed())
    }

    /// At least one package failed but not all of them.
    pub fn is_partial_failure(&self) -> bool {
        let failed = self.failures().count();
        failed > 0 && failed < self.results.len()
    }

    pub fn all_installed(&self) -> bool {
        self.results.iter().all(PackageResult::is_installed)
    }
}

impl fmt::Display for InstallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, result) in self.results.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{result}")?;
        }
        Ok(())
    }
}

/// Runs the sandbox's package manager once per package.
pub(crate) struct DependencyInstaller {
    runtime: Arc<dyn ContainerRuntime>,
    workspace: String,
    timeout: Duration,
}

impl DependencyInstaller {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, workspace: String, timeout: Duration) -> Self {
        Self {
            runtime,
            workspace,
            timeout,
        }
    }

    /// Overrides the per-package deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Installs each package independently; a failure never stops the rest.
    ///
    /// Only a missing sandbox or an unreachable runtime fails the whole call,
    /// and both are detected before the first package is attempted.
    pub async fn install(
        &self,
        sandbox: &SandboxRef,
        packages: &[String],
    ) -> Result<InstallReport, SandboxError> {
        self.runtime
            .inspect(sandbox.name())
            .await
            .map_err(|e| SandboxError::from_engine(sandbox.name(), e))?;

        let mut results = Vec::with_capacity(packages.len());
        for package in packages {
            let outcome = self.install_one(sandbox, package).await;
            match &outcome {
                PackageOutcome::Installed => info!(
                    event = "package_installed",
                    sandbox = %sandbox,
                    package = %package,
                ),
                _ => warn!(
                    event = "package_failed",
                    sandbox = %sandbox,
                    package = %package,
                ),
            }
            results.push(PackageResult {
                package: package.clone(),
                outcome,
            });
        }
        Ok(InstallReport { results })
    }

    async fn install_one(&self, sandbox: &SandboxRef, package: &str) -> PackageOutcome {
        if let Err(reason) = check_package_name(package) {
            return PackageOutcome::Failed { output: reason };
        }

        let mut cmd: Vec<String> = PIP_INSTALL.iter().map(|s| (*s).to_string()).collect();
        cmd.push(package.to_string());
        let spec = ExecSpec {
            cmd,
            working_dir: self.workspace.clone(),
            env: Vec::new(),
            timeout: Some(self.timeout),
        };

        match self.runtime.exec(sandbox.name(), &spec).await {
            Ok(out) if out.timed_out => PackageOutcome::TimedOut {
                after_secs: self.timeout.as_secs(),
            },
            Ok(out) if out.exit_code == Some(0) => PackageOutcome::Installed,
            Ok(out) => PackageOutcome::Failed {
                output: condense(&out.output),
            },
            Err(e) => PackageOutcome::Failed {
                output: SandboxError::from_engine(sandbox.name(), e).to_string(),
            },
        }
    }
}

/// Refuses names the package manager would read as options or split apart.
fn check_package_name(package: &str) -> Result<(), String> {
    if package.trim().is_empty() {
        Err("empty package name".to_string())
    } else if package.starts_with('-') {
        Err(format!("'{package}' looks like an option, not a package"))
    } else if package.chars().any(char::is_whitespace) {
        Err(format!("'{package}' contains whitespace"))
    } else {
        Ok(())
    }
}

/// Keeps a failure on one line: pip's `ERROR:` lines when present, else all
/// non-empty lines.
fn condense(output: &str) -> String {
    let lines: Vec<&str> = output.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let errors: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| l.starts_with("ERROR"))
        .collect();
    let picked = if errors.is_empty() { lines } else { errors };
    if picked.is_empty() {
        "no output from package manager".to_string()
    } else {
        picked.join(" | ")
    }
}
