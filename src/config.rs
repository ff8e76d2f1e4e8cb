use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(crate) const CONFIG_FILE: &str = "codeagent.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-user sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Base image every sandbox starts from
    #[serde(default = "default_image")]
    pub image: String,

    /// Memory ceiling (e.g., "512m", "2g")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// Host directory holding one bind-mounted workspace per user.
    /// A leading `~/` expands to the home directory.
    #[serde(default = "default_host_root")]
    pub host_root: String,

    /// Workspace path inside the sandbox
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Interpreter command line used to run programs
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Maximum wall-clock run time of one program
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Maximum time for installing one package
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,

    /// Maximum time for one file transfer
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,

    /// Pull the base image when it is missing locally
    #[serde(default = "default_true")]
    pub pull_missing_image: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            memory: default_memory(),
            host_root: default_host_root(),
            workspace: default_workspace(),
            interpreter: default_interpreter(),
            exec_timeout_secs: default_exec_timeout(),
            install_timeout_secs: default_install_timeout(),
            transfer_timeout_secs: default_transfer_timeout(),
            pull_missing_image: true,
        }
    }
}

impl SandboxConfig {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Resolved host root with `~` expanded
    pub fn host_root_path(&self) -> Result<PathBuf> {
        expand_path(&self.host_root).map(PathBuf::from)
    }

    /// Interpreter split into argv words
    pub fn interpreter_argv(&self) -> Result<Vec<String>> {
        let words = shell_words::split(&self.interpreter)
            .with_context(|| format!("Invalid interpreter command: {}", self.interpreter))?;
        if words.is_empty() {
            anyhow::bail!("Interpreter command is empty");
        }
        Ok(words)
    }
}

/// Text-generation service (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// API base URL
    #[serde(default = "default_model_base_url")]
    pub base_url: String,

    /// Model identifier. Falls back to `GROQ_MODEL` when unset.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub temperature: f32,

    /// Maximum model turns per request before giving up
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_model_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            model: None,
            temperature: 0.0,
            max_steps: default_max_steps(),
            request_timeout_secs: default_model_request_timeout(),
        }
    }
}

/// Knowledge-search service (Tavily)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_max_results")]
    pub max_results: u32,

    #[serde(default = "default_topic")]
    pub topic: String,

    /// Ask the service for an aggregated answer
    #[serde(default = "default_true")]
    pub include_answer: bool,

    #[serde(default = "default_search_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
            topic: default_topic(),
            include_answer: true,
            request_timeout_secs: default_search_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to a file
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_log_directory")]
    pub directory: String,

    #[serde(default = "default_log_file")]
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_log_directory(),
            file: default_log_file(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_image() -> String {
    "python:3.9-slim".to_string()
}

fn default_memory() -> String {
    "512m".to_string()
}

fn default_host_root() -> String {
    std::env::temp_dir().join("codeagent").display().to_string()
}

fn default_workspace() -> String {
    "/workspace".to_string()
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_exec_timeout() -> u64 {
    60
}

fn default_install_timeout() -> u64 {
    300
}

fn default_transfer_timeout() -> u64 {
    30
}

fn default_model_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_max_steps() -> u32 {
    12
}

fn default_model_request_timeout() -> u64 {
    120
}

fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}

fn default_max_results() -> u32 {
    5
}

fn default_topic() -> String {
    "general".to_string()
}

fn default_search_request_timeout() -> u64 {
    30
}

fn default_log_directory() -> String {
    "logs".to_string()
}

fn default_log_file() -> String {
    "app.log".to_string()
}

impl Config {
    /// Load configuration from `path`, or `codeagent.toml` in `project_dir`,
    /// using defaults if the file does not exist
    pub fn load(project_dir: &Path, path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(explicit) => {
                if !explicit.exists() {
                    anyhow::bail!("Config file not found: {}", explicit.display());
                }
                explicit.to_path_buf()
            }
            None => project_dir.join(CONFIG_FILE),
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> Result<String> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(rest).display().to_string())
    } else {
        Ok(path.to_string())
    }
}
