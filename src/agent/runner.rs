//! The repair loop: model turn, tool calls, repeat.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ChatModel, Message, Reply};
use crate::templates;
use crate::tools::{tool_definitions, ToolRouter};

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AgentRun {
    pub answer: String,
    /// Model turns taken, including the final one.
    pub steps: u32,
    /// Names of the tools called, in order.
    pub tools_called: Vec<String>,
}

/// Drives one model against one user's sandbox.
pub(crate) struct CodeAgent {
    model: Arc<dyn ChatModel>,
    router: ToolRouter,
    max_steps: u32,
}

impl CodeAgent {
    pub fn new(model: Arc<dyn ChatModel>, router: ToolRouter, max_steps: u32) -> Self {
        Self {
            model,
            router,
            max_steps,
        }
    }

    /// Runs `request` until the model answers or `max_steps` turns are used.
    pub async fn run(&self, request: &str) -> Result<AgentRun> {
        let tools = tool_definitions();
        let mut messages = vec![
            Message::System(templates::system_prompt(self.router.sandbox().name())),
            Message::User(request.to_string()),
        ];
        let mut tools_called = Vec::new();

        info!(
            event = "agent_start",
            model = %self.model.name(),
            sandbox = %self.router.sandbox(),
            max_steps = self.max_steps,
        );

        for step in 1..=self.max_steps {
            debug!("Model turn {}", step);
            match self.model.complete(&messages, &tools).await? {
                Reply::Final(answer) => {
                    info!(
                        event = "agent_end",
                        steps = step,
                        tool_calls = tools_called.len(),
                        reason = "answered",
                    );
                    return Ok(AgentRun {
                        answer,
                        steps: step,
                        tools_called,
                    });
                }
                Reply::ToolCalls { content, calls } => {
                    messages.push(Message::Assistant {
                        content,
                        tool_calls: calls.clone(),
                    });
                    for call in calls {
                        let result = self.router.handle_call(&call.name, &call.arguments).await;
                        tools_called.push(call.name);
                        messages.push(Message::Tool {
                            call_id: call.id,
                            content: result,
                        });
                    }
                }
            }
        }

        info!(
            event = "agent_end",
            steps = self.max_steps,
            tool_calls = tools_called.len(),
            reason = "max_steps_reached",
        );
        anyhow::bail!(
            "No final answer after {} model turns ({} tool calls)",
            self.max_steps,
            tools_called.len()
        )
    }
}
