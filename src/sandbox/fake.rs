//! In-memory container runtime for tests.
//!
//! Keeps containers and their files in a map, unpacks uploaded tar archives,
//! and interprets a tiny line-oriented program format instead of Python:
//!
//! - `print <text>` writes `<text>` and a newline
//! - `fail <text>` writes `<text>` and exits with status 1
//! - `sleep` never finishes, so the run hits its deadline
//!
//! Like Python on a pipe, `print` output is held back until exit unless the
//! exec carries `PYTHONUNBUFFERED=1`: it lands after a `fail` trace and is
//! lost when the deadline fires.
//!
//! `pip install` succeeds unless the package name contains `nonexistent`,
//! and times out when it contains `slow`.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::Mutex;

use super::executor::UNBUFFERED_ENV;
use super::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, EngineError, ExecOutput, ExecSpec,
};

#[derive(Debug)]
struct FakeContainer {
    id: String,
    running: bool,
    spec: Option<ContainerSpec>,
    files: HashMap<String, Vec<u8>>,
    execs: Vec<Vec<String>>,
    exec_envs: Vec<Vec<String>>,
}

impl FakeContainer {
    fn new(id: String, spec: Option<ContainerSpec>) -> Self {
        Self {
            id,
            running: true,
            spec,
            files: HashMap::new(),
            execs: Vec::new(),
            exec_envs: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    images: HashSet<String>,
    create_calls: usize,
    pull_calls: usize,
    uploads: usize,
    offline: bool,
    lose_create_race: bool,
    reject_uploads: bool,
    stall_uploads: bool,
}

/// A scripted stand-in for the Docker daemon.
#[derive(Debug, Default)]
pub(crate) struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the daemon socket were gone.
    pub fn offline() -> Self {
        let runtime = Self::new();
        runtime.state.lock().unwrap().offline = true;
        runtime
    }

    /// Makes the next `create` find the name already taken by a concurrent caller.
    pub fn lose_next_create_race(&self) {
        self.state.lock().unwrap().lose_create_race = true;
    }

    /// Makes every upload fail after the archive was received.
    pub fn reject_uploads(&self) {
        self.state.lock().unwrap().reject_uploads = true;
    }

    /// Makes every upload hang until the caller gives up on it.
    pub fn stall_uploads(&self) {
        self.state.lock().unwrap().stall_uploads = true;
    }

    pub fn add_image(&self, image: &str) {
        self.state.lock().unwrap().images.insert(image.to_string());
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn pull_calls(&self) -> usize {
        self.state.lock().unwrap().pull_calls
    }

    pub fn uploads(&self) -> usize {
        self.state.lock().unwrap().uploads
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().unwrap().containers.contains_key(name)
    }

    pub fn stop(&self, name: &str) {
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(name) {
            container.running = false;
        }
    }

    /// Absolute in-container path → file bytes.
    pub fn file(&self, name: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .and_then(|c| c.files.get(path).cloned())
    }

    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .and_then(|c| c.spec.clone())
    }

    /// Commands executed in `name`, in order.
    pub fn execs(&self, name: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|c| c.execs.clone())
            .unwrap_or_default()
    }

    /// Environment of each exec in `name`, in order.
    pub fn exec_envs(&self, name: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|c| c.exec_envs.clone())
            .unwrap_or_default()
    }

    fn check_online(state: &FakeState) -> Result<(), EngineError> {
        if state.offline {
            Err(EngineError::Unreachable(
                "error trying to connect: No such file or directory".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), EngineError> {
        Self::check_online(&self.state.lock().unwrap())
    }

    async fn inspect(&self, name: &str) -> Result<ContainerState, EngineError> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        state
            .containers
            .get(name)
            .map(|c| ContainerState {
                id: c.id.clone(),
                running: c.running,
            })
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))
    }

    async fn ensure_image(&self, image: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        if state.images.insert(image.to_string()) {
            state.pull_calls += 1;
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;

        if std::mem::take(&mut state.lose_create_race) {
            state.containers.insert(
                spec.name.clone(),
                FakeContainer::new(format!("winner-{}", spec.name), Some(spec.clone())),
            );
        }
        if state.containers.contains_key(&spec.name) {
            return Err(EngineError::Api {
                status: 409,
                message: format!("Conflict. The container name \"/{}\" is already in use", spec.name),
            });
        }
        if !state.images.contains(&spec.image) {
            return Err(EngineError::NotFound(format!("No such image: {}", spec.image)));
        }

        state.create_calls += 1;
        let id = format!("fake-{}", state.create_calls);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer::new(id.clone(), Some(spec.clone())),
        );
        Ok(id)
    }

    async fn start(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))?;
        container.running = true;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        state
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))
    }

    async fn exec(&self, name: &str, spec: &ExecSpec) -> Result<ExecOutput, EngineError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))?;
        if !container.running {
            return Err(EngineError::Api {
                status: 409,
                message: format!("Container {name} is not running"),
            });
        }
        container.execs.push(spec.cmd.clone());
        container.exec_envs.push(spec.env.clone());

        let Some(last) = spec.cmd.last() else {
            return Ok(finished(127, "no command\n"));
        };

        if spec.cmd.first().map(String::as_str) == Some("pip") {
            return Ok(fake_pip(last, spec));
        }

        let path = if last.starts_with('/') {
            last.clone()
        } else {
            format!("{}/{}", spec.working_dir.trim_end_matches('/'), last)
        };
        match container.files.get(&path) {
            Some(source) => Ok(interpret(&String::from_utf8_lossy(source), spec)),
            None => Ok(finished(
                2,
                &format!("python: can't open file '{path}': [Errno 2] No such file or directory\n"),
            )),
        }
    }

    async fn upload(&self, name: &str, dest_dir: &str, archive: Bytes) -> Result<(), EngineError> {
        let stalled = self.state.lock().unwrap().stall_uploads;
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        state.uploads += 1;
        if state.reject_uploads {
            return Err(EngineError::Api {
                status: 500,
                message: "archive rejected".to_string(),
            });
        }
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))?;

        let mut tar = tar::Archive::new(&archive[..]);
        let entries = tar.entries().map_err(|e| EngineError::Api {
            status: 400,
            message: e.to_string(),
        })?;
        for entry in entries {
            let mut entry = entry.map_err(|e| EngineError::Api {
                status: 400,
                message: e.to_string(),
            })?;
            let path = entry
                .path()
                .map_err(|e| EngineError::Api {
                    status: 400,
                    message: e.to_string(),
                })?
                .display()
                .to_string();
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(|e| EngineError::Unreachable(e.to_string()))?;
            container.files.insert(
                format!("{}/{}", dest_dir.trim_end_matches('/'), path),
                content,
            );
        }
        Ok(())
    }
}

fn finished(exit_code: i64, output: &str) -> ExecOutput {
    ExecOutput {
        exit_code: Some(exit_code),
        output: output.to_string(),
        timed_out: false,
    }
}

fn fake_pip(package: &str, spec: &ExecSpec) -> ExecOutput {
    if package.contains("nonexistent") {
        finished(
            1,
            &format!(
                "ERROR: Could not find a version that satisfies the requirement {package}\n\
                 ERROR: No matching distribution found for {package}\n"
            ),
        )
    } else if package.contains("slow") && spec.timeout.is_some() {
        ExecOutput {
            exit_code: Some(124),
            output: format!("Collecting {package}\n"),
            timed_out: true,
        }
    } else {
        finished(0, &format!("Successfully installed {package}\n"))
    }
}

fn interpret(source: &str, spec: &ExecSpec) -> ExecOutput {
    let unbuffered = spec.env.iter().any(|entry| entry == UNBUFFERED_ENV);
    let mut output = String::new();
    let mut held = String::new();
    for line in source.lines() {
        let line = line.trim();
        if let Some(text) = line.strip_prefix("print ") {
            let stdout = if unbuffered { &mut output } else { &mut held };
            stdout.push_str(text);
            stdout.push('\n');
        } else if let Some(text) = line.strip_prefix("fail ") {
            output.push_str(text);
            output.push('\n');
            output.push_str(&held);
            return finished(1, &output);
        } else if line == "sleep" {
            if spec.timeout.is_some() {
                return ExecOutput {
                    exit_code: Some(124),
                    output,
                    timed_out: true,
                };
            }
            held.push_str("slept\n");
        }
    }
    output.push_str(&held);
    finished(0, &output)
}
