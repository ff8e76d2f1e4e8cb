//! The closed set of operations a model may call.
//!
//! Tool calls arrive as a name plus a JSON argument string. They are decoded
//! into [`ToolRequest`] and dispatched by [`ToolRouter`], which always answers
//! with text: failures become messages the model can read and act on.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::sandbox::{SandboxError, SandboxRef, SandboxRegistry};
use crate::search::SearchProvider;

pub(crate) const INSTALL_TOOL: &str = "install_dependencies";
pub(crate) const EXECUTE_TOOL: &str = "execute_python_code";
pub(crate) const SEARCH_TOOL: &str = "search_tool";

/// A decoded tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ToolRequest {
    InstallDependencies {
        dependencies: Vec<String>,
        container_name: String,
    },
    ExecutePythonCode {
        code: String,
        container_name: String,
        filename: Option<String>,
    },
    Search {
        search_query: String,
    },
}

#[derive(Debug, Deserialize)]
struct InstallArgs {
    dependencies: Vec<String>,
    container_name: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    code: String,
    container_name: String,
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    search_query: String,
}

/// A tool call that could not be decoded.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {source}")]
    InvalidArguments {
        tool: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ToolRequest {
    /// Decodes a call by tool name and raw JSON arguments.
    pub fn from_call(name: &str, arguments: &str) -> Result<Self, ToolError> {
        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        match name {
            INSTALL_TOOL => {
                let args: InstallArgs = parse_args(INSTALL_TOOL, arguments)?;
                Ok(Self::InstallDependencies {
                    dependencies: args.dependencies,
                    container_name: args.container_name,
                })
            }
            EXECUTE_TOOL => {
                let args: ExecuteArgs = parse_args(EXECUTE_TOOL, arguments)?;
                Ok(Self::ExecutePythonCode {
                    code: args.code,
                    container_name: args.container_name,
                    filename: args.filename.filter(|f| !f.trim().is_empty()),
                })
            }
            SEARCH_TOOL => {
                let args: SearchArgs = parse_args(SEARCH_TOOL, arguments)?;
                Ok(Self::Search {
                    search_query: args.search_query,
                })
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InstallDependencies { .. } => INSTALL_TOOL,
            Self::ExecutePythonCode { .. } => EXECUTE_TOOL,
            Self::Search { .. } => SEARCH_TOOL,
        }
    }

    fn container_name(&self) -> Option<&str> {
        match self {
            Self::InstallDependencies { container_name, .. }
            | Self::ExecutePythonCode { container_name, .. } => Some(container_name),
            Self::Search { .. } => None,
        }
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(
    tool: &'static str,
    arguments: &str,
) -> Result<T, ToolError> {
    serde_json::from_str(arguments).map_err(|source| ToolError::InvalidArguments { tool, source })
}

/// JSON function definitions in the chat-completions `tools` format.
pub(crate) fn tool_definitions() -> Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": INSTALL_TOOL,
                "description": "Install Python dependencies in a Docker container. \
                    The container must already be running and accessible by name. \
                    Returns one success or failure line per package.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "dependencies": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "List of Python package names to install"
                        },
                        "container_name": {
                            "type": "string",
                            "description": "Name of the existing Docker container"
                        }
                    },
                    "required": ["dependencies", "container_name"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": EXECUTE_TOOL,
                "description": "Execute Python code in a Docker container. \
                    The container must already be running and accessible by name. \
                    Returns the program output or the error trace.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "code": {
                            "type": "string",
                            "description": "Python code to execute"
                        },
                        "container_name": {
                            "type": "string",
                            "description": "Name of the existing Docker container"
                        },
                        "filename": {
                            "type": "string",
                            "description": "Optional filename to use in the container \
                                (defaults to a timestamp-based name)"
                        }
                    },
                    "required": ["code", "container_name"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": SEARCH_TOOL,
                "description": "Performs real-time web searches to fetch current information, \
                    code examples, or documentation. Use it only for errors that cannot be \
                    resolved through reasoning and iterative fixes, or for libraries and \
                    concepts that need more context.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "search_query": {
                            "type": "string",
                            "description": "A concise query describing the error message, \
                                unknown concept, or missing context"
                        }
                    },
                    "required": ["search_query"]
                }
            }
        }
    ])
}

/// Dispatches tool calls for one session's sandbox.
pub(crate) struct ToolRouter {
    registry: Arc<SandboxRegistry>,
    search: Option<Arc<dyn SearchProvider>>,
    sandbox: SandboxRef,
}

impl ToolRouter {
    /// `search` is `None` when no search service is configured; search calls
    /// then answer with an explanation instead of results.
    pub fn new(
        registry: Arc<SandboxRegistry>,
        search: Option<Arc<dyn SearchProvider>>,
        sandbox: SandboxRef,
    ) -> Self {
        Self {
            registry,
            search,
            sandbox,
        }
    }

    pub fn sandbox(&self) -> &SandboxRef {
        &self.sandbox
    }

    /// Decodes and runs one raw tool call.
    pub async fn handle_call(&self, name: &str, arguments: &str) -> String {
        match ToolRequest::from_call(name, arguments) {
            Ok(request) => self.dispatch(&request).await,
            Err(e) => {
                warn!(event = "tool_call_rejected", tool = %name, error = %e);
                format!("Error: {e}")
            }
        }
    }

    /// Runs a decoded request. Never fails; the answer is always text.
    pub async fn dispatch(&self, request: &ToolRequest) -> String {
        info!(event = "tool_called", tool = request.name(), sandbox = %self.sandbox);

        if let Some(name) = request.container_name() {
            if name != self.sandbox.name() {
                return format!(
                    "Error: Container '{name}' is not available in this session. Use container: {}.",
                    self.sandbox
                );
            }
        }

        match request {
            ToolRequest::InstallDependencies { dependencies, .. } => {
                self.install(dependencies).await
            }
            ToolRequest::ExecutePythonCode { code, filename, .. } => {
                self.execute(code, filename.as_deref()).await
            }
            ToolRequest::Search { search_query } => self.search(search_query).await,
        }
    }

    async fn install(&self, dependencies: &[String]) -> String {
        if dependencies.is_empty() {
            return "No dependencies requested".to_string();
        }
        match self.registry.installer().install(&self.sandbox, dependencies).await {
            Ok(report) => report.to_string(),
            Err(e) => describe_sandbox_error(&e),
        }
    }

    async fn execute(&self, code: &str, filename: Option<&str>) -> String {
        let filename = filename.map_or_else(default_filename, str::to_string);

        if let Err(e) = self
            .registry
            .transfer()
            .deposit(&self.sandbox, code.as_bytes(), &filename)
            .await
        {
            return describe_sandbox_error(&e);
        }

        let executor = self.registry.executor();
        let outcome = executor.run(&self.sandbox, &filename).await;
        outcome.report(executor.limit())
    }

    async fn search(&self, query: &str) -> String {
        let Some(search) = &self.search else {
            return "Search Error: knowledge search is not configured".to_string();
        };
        match search.search(query).await {
            Ok(text) => text,
            Err(e) => format!("Search Error: {e}"),
        }
    }
}

/// Time-derived name for a program deposited without one.
fn default_filename() -> String {
    format!("code_{}.py", chrono::Utc::now().timestamp_millis())
}

/// Renders a sandbox failure the way tool responses report them.
pub(crate) fn describe_sandbox_error(err: &SandboxError) -> String {
    match err {
        SandboxError::NotFound { .. } => format!("Error: {err}. Please ensure it's running."),
        SandboxError::EnvironmentUnavailable { message } => format!("Docker API Error: {message}"),
        other => format!("Error: {other}"),
    }
}
