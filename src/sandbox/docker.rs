//! Docker-backed container runtime.
//!
//! Wraps a single `bollard::Docker` handle. Exec deadlines are enforced twice:
//! inside the container with coreutils `timeout`, so the process really dies,
//! and on the host while draining the output stream, so a wedged exec never
//! blocks the caller.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, RemoveContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, EngineError, ExecOutput, ExecSpec,
};

/// Grace period between TERM and KILL for timed-out commands.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Extra host-side slack on top of the in-container deadline.
const HOST_SLACK: Duration = Duration::from_secs(3);

/// Exit status of coreutils `timeout` when the deadline fired.
const TIMEOUT_EXIT: i64 = 124;

/// Exit status of a process killed by SIGKILL.
const KILLED_EXIT: i64 = 137;

/// Container runtime talking to the local Docker daemon.
pub(crate) struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon and verifies it answers.
    pub async fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Unreachable(format!("{e}. Is Docker running?")))?;
        let runtime = Self { docker };
        runtime.ping().await?;
        Ok(runtime)
    }
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => Self::NotFound(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => Self::Api {
                status: status_code,
                message,
            },
            other => Self::Unreachable(other.to_string()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), EngineError> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<ContainerState, EngineError> {
        let inspect = self.docker.inspect_container(name, None).await?;
        Ok(ContainerState {
            id: inspect.id.unwrap_or_else(|| name.to_string()),
            running: inspect
                .state
                .and_then(|state| state.running)
                .unwrap_or(false),
        })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), EngineError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) => match EngineError::from(e) {
                EngineError::NotFound(_) => {}
                other => return Err(other),
            },
        }

        info!("Pulling image {}", image);
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(chunk) = stream.next().await {
            let info = chunk?;
            if let Some(error) = info.error {
                return Err(EngineError::Api {
                    status: 500,
                    message: format!("Failed to pull image {image}: {error}"),
                });
            }
            if let Some(status) = info.status {
                debug!("Pull status: {}", status);
            }
        }

        info!("Pulled image {}", image);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let host_dir = spec.host_dir.to_str().ok_or_else(|| EngineError::Api {
            status: 400,
            message: format!("Host path is not valid UTF-8: {}", spec.host_dir.display()),
        })?;

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            working_dir: Some(spec.workspace.clone()),
            tty: Some(true),
            labels: Some(spec.labels.clone()),
            host_config: Some(bollard::service::HostConfig {
                binds: Some(vec![format!("{}:{}:rw", host_dir, spec.workspace)]),
                memory: Some(spec.memory_bytes),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        debug!("Creating container: {}", spec.name);
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;

        for warning in &created.warnings {
            warn!("Docker warning for {}: {}", spec.name, warning);
        }

        self.start(&spec.name).await?;
        Ok(created.id)
    }

    async fn start(&self, name: &str) -> Result<(), EngineError> {
        debug!("Starting container: {}", name);
        self.docker.start_container::<String>(name, None).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), EngineError> {
        debug!("Removing container: {}", name);
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn exec(&self, name: &str, spec: &ExecSpec) -> Result<ExecOutput, EngineError> {
        let cmd = match spec.timeout {
            Some(limit) => with_deadline(&spec.cmd, limit),
            None => spec.cmd.clone(),
        };
        debug!("Exec in {}: {:?}", name, cmd);

        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(spec.working_dir.clone()),
                    env: (!spec.env.is_empty()).then(|| spec.env.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let started = Instant::now();
        let deadline = spec
            .timeout
            .map(|limit| tokio::time::Instant::now() + limit + KILL_GRACE + HOST_SLACK);
        let mut output = Vec::new();
        let mut abandoned = false;

        if let StartExecResults::Attached {
            output: mut stream, ..
        } = self.docker.start_exec(&exec.id, None).await?
        {
            loop {
                let next = match deadline {
                    Some(at) => match tokio::time::timeout_at(at, stream.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!("Exec in {} outlived its deadline, abandoning stream", name);
                            abandoned = true;
                            break;
                        }
                    },
                    None => stream.next().await,
                };

                match next {
                    Some(Ok(
                        LogOutput::StdOut { message }
                        | LogOutput::StdErr { message }
                        | LogOutput::Console { message },
                    )) => output.extend_from_slice(&message),
                    Some(Ok(LogOutput::StdIn { .. })) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                }
            }
        }

        let output = String::from_utf8_lossy(&output).into_owned();

        if abandoned {
            return Ok(ExecOutput {
                exit_code: None,
                output,
                timed_out: true,
            });
        }

        let exit_code = self.docker.inspect_exec(&exec.id).await?.exit_code;
        let timed_out = spec
            .timeout
            .is_some_and(|limit| hit_deadline(exit_code, started.elapsed(), limit));

        Ok(ExecOutput {
            exit_code,
            output,
            timed_out,
        })
    }

    async fn upload(&self, name: &str, dest_dir: &str, archive: Bytes) -> Result<(), EngineError> {
        debug!(
            "Uploading {} byte archive to {}:{}",
            archive.len(),
            name,
            dest_dir
        );
        let options = UploadToContainerOptions {
            path: dest_dir.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(name, Some(options), archive)
            .await?;
        Ok(())
    }
}

/// Prefixes `cmd` with coreutils `timeout` so the process is killed in-container.
fn with_deadline(cmd: &[String], limit: Duration) -> Vec<String> {
    let mut wrapped = vec![
        "timeout".to_string(),
        "--kill-after".to_string(),
        format!("{}s", KILL_GRACE.as_secs()),
        format!("{}s", limit.as_secs_f64()),
    ];
    wrapped.extend(cmd.iter().cloned());
    wrapped
}

/// Decides whether an exit status means the in-container deadline fired.
fn hit_deadline(exit_code: Option<i64>, elapsed: Duration, limit: Duration) -> bool {
    match exit_code {
        Some(TIMEOUT_EXIT | KILLED_EXIT) => elapsed >= limit,
        _ => false,
    }
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
pub(crate) fn parse_memory_limit(limit: &str) -> anyhow::Result<i64> {
    use anyhow::Context;

    let limit = limit.trim().to_lowercase();

    if let Some(num) = limit.strip_suffix('g') {
        let gigs: i64 = num.parse().context("Invalid memory limit")?;
        Ok(gigs * 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        let megs: i64 = num.parse().context("Invalid memory limit")?;
        Ok(megs * 1024 * 1024)
    } else {
        limit.parse().context("Invalid memory limit")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::sandbox::{OutcomeCategory, Provision, RemoveStatus, SandboxRegistry};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("8g").unwrap(), 8 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1048576").unwrap(), 1_048_576);
        assert!(parse_memory_limit("lots").is_err());
    }

    #[test]
    fn test_with_deadline_wraps_command() {
        let cmd = vec!["python".to_string(), "t.py".to_string()];
        let wrapped = with_deadline(&cmd, Duration::from_secs(5));
        assert_eq!(
            wrapped,
            vec!["timeout", "--kill-after", "2s", "5s", "python", "t.py"]
        );

        let wrapped = with_deadline(&cmd, Duration::from_millis(1500));
        assert_eq!(wrapped[3], "1.5s");
    }

    #[test]
    fn test_hit_deadline() {
        let limit = Duration::from_secs(5);
        assert!(hit_deadline(Some(124), Duration::from_secs(5), limit));
        // A program may exit 124 on its own
        assert!(!hit_deadline(Some(124), Duration::from_millis(10), limit));
        assert!(hit_deadline(Some(137), Duration::from_secs(7), limit));
        // An OOM kill before the deadline is not a timeout
        assert!(!hit_deadline(Some(137), Duration::from_secs(1), limit));
        assert!(!hit_deadline(Some(1), Duration::from_secs(9), limit));
        assert!(!hit_deadline(None, Duration::from_secs(9), limit));
    }

    #[test]
    fn test_bollard_error_mapping() {
        let missing = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: sandbox-x".to_string(),
        };
        assert!(matches!(EngineError::from(missing), EngineError::NotFound(_)));

        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "Conflict".to_string(),
        };
        assert!(EngineError::from(conflict).is_conflict());

        let timeout = bollard::errors::Error::RequestTimeoutError;
        assert!(matches!(
            EngineError::from(timeout),
            EngineError::Unreachable(_)
        ));
    }

    // -------------------------------------------------------------------------
    // End-to-end tests against a live daemon: cargo test -- --ignored
    // -------------------------------------------------------------------------

    async fn live_registry(host_root: &std::path::Path) -> SandboxRegistry {
        let runtime = DockerRuntime::connect()
            .await
            .expect("Docker daemon must be running");
        let settings = SandboxConfig {
            host_root: host_root.display().to_string(),
            exec_timeout_secs: 5,
            ..SandboxConfig::default()
        };
        SandboxRegistry::new(Arc::new(runtime), settings).expect("default settings are valid")
    }

    #[tokio::test]
    #[ignore = "requires a running Docker daemon"]
    async fn test_docker_print_round_trip() {
        let host = tempdir().unwrap();
        let registry = live_registry(host.path()).await;
        let user = format!("e2e{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

        let first = registry.ensure(&user).await.unwrap();
        let second = registry.ensure(&user).await.unwrap();
        assert_eq!(first.sandbox, second.sandbox);
        assert_eq!(second.provision, Provision::AlreadyExists);

        registry
            .transfer()
            .deposit(&first.sandbox, b"print(2+2)\n", "t.py")
            .await
            .unwrap();
        let outcome = registry.executor().run(&first.sandbox, "t.py").await;
        assert!(outcome.succeeded, "{outcome:?}");
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.captured_output.contains('4'));

        assert_eq!(
            registry.remove(&user).await.unwrap(),
            RemoveStatus::Removed(first.sandbox.name().to_string())
        );
    }

    #[tokio::test]
    #[ignore = "requires a running Docker daemon and network access"]
    async fn test_docker_partial_install() {
        let host = tempdir().unwrap();
        let registry = live_registry(host.path()).await;
        let user = format!("e2e{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let sandbox = registry.ensure(&user).await.unwrap().sandbox;

        let report = registry
            .installer()
            .install(
                &sandbox,
                &["six".to_string(), "nonexistent-pkg-xyz123".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(report.results().len(), 2);
        assert!(report.results()[0].is_installed());
        assert!(!report.results()[1].is_installed());
        assert!(report.to_string().contains("nonexistent-pkg-xyz123"));
        assert!(report.is_partial_failure());

        registry.remove(&user).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Docker daemon"]
    async fn test_docker_timeout_then_recover() {
        let host = tempdir().unwrap();
        let registry = live_registry(host.path()).await;
        let user = format!("e2e{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let sandbox = registry.ensure(&user).await.unwrap().sandbox;
        let transfer = registry.transfer();
        let executor = registry.executor();

        transfer
            .deposit(&sandbox, b"import time\nprint('start')\ntime.sleep(60)\n", "slow.py")
            .await
            .unwrap();
        let outcome = executor.run(&sandbox, "slow.py").await;
        assert_eq!(outcome.category, OutcomeCategory::TimedOut);
        assert!(outcome.captured_output.contains("start"));

        transfer
            .deposit(&sandbox, b"print('after')\n", "fast.py")
            .await
            .unwrap();
        let outcome = executor.run(&sandbox, "fast.py").await;
        assert!(outcome.succeeded, "{outcome:?}");

        registry.remove(&user).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Docker daemon"]
    async fn test_docker_trace_follows_earlier_output() {
        let host = tempdir().unwrap();
        let registry = live_registry(host.path()).await;
        let user = format!("e2e{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let sandbox = registry.ensure(&user).await.unwrap().sandbox;

        registry
            .transfer()
            .deposit(&sandbox, b"print('before')\n1/0\n", "bad.py")
            .await
            .unwrap();
        let outcome = registry.executor().run(&sandbox, "bad.py").await;
        assert_eq!(outcome.category, OutcomeCategory::RuntimeError);
        let before = outcome.captured_output.find("before").unwrap();
        let trace = outcome.captured_output.find("Traceback").unwrap();
        assert!(before < trace, "{}", outcome.captured_output);

        registry.remove(&user).await.unwrap();
    }
}
