//! Single-shot program execution inside a sandbox.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use super::outcome::ExecutionOutcome;
use super::registry::SandboxRef;
use super::runtime::{ContainerRuntime, EngineError, ExecSpec};

/// Keeps stdout unbuffered on a pipe so output survives a kill and
/// interleaves with stderr in write order.
pub(crate) const UNBUFFERED_ENV: &str = "PYTHONUNBUFFERED=1";

/// Runs deposited programs with the sandbox interpreter under a deadline.
///
/// Never retries; the caller decides what to do with a failed outcome.
pub(crate) struct CodeExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    workspace: String,
    interpreter: Vec<String>,
    timeout: Duration,
}

impl CodeExecutor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        workspace: String,
        interpreter: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            workspace,
            interpreter,
            timeout,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Maximum wall-clock time of one run.
    pub fn limit(&self) -> Duration {
        self.timeout
    }

    /// Runs `program` (a workspace-relative path) and classifies the result.
    ///
    /// Every failure comes back as an outcome; nothing here returns an error.
    pub async fn run(&self, sandbox: &SandboxRef, program: &str) -> ExecutionOutcome {
        let mut cmd = self.interpreter.clone();
        cmd.push(program_arg(program));
        let spec = ExecSpec {
            cmd,
            working_dir: self.workspace.clone(),
            env: vec![UNBUFFERED_ENV.to_string()],
            timeout: Some(self.timeout),
        };

        let started = Instant::now();
        let outcome = match self.runtime.exec(sandbox.name(), &spec).await {
            Ok(out) if out.timed_out => ExecutionOutcome::timed_out(out.exit_code, out.output),
            Ok(out) => match out.exit_code {
                Some(code) => ExecutionOutcome::completed(code, out.output),
                None => ExecutionOutcome::transport_error(format!(
                    "exit status of {program} was not reported"
                )),
            },
            Err(EngineError::NotFound(_)) => ExecutionOutcome::sandbox_missing(sandbox.name()),
            Err(e) => ExecutionOutcome::transport_error(e.to_string()),
        };

        info!(
            event = "program_finished",
            sandbox = %sandbox,
            program = %program,
            category = %outcome.category,
            exit_code = ?outcome.exit_code,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        );
        outcome
    }
}

/// A program named like an option is passed as a path instead.
fn program_arg(program: &str) -> String {
    if program.starts_with('-') {
        format!("./{program}")
    } else {
        program.to_string()
    }
}
