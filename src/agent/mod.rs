//! Text-generation side of the repair loop.
//!
//! A [`ChatModel`] takes the conversation so far plus the tool schema and
//! answers with either tool calls or a final answer. [`CodeAgent`] drives the
//! loop, dispatching every call through the tool router.
//!
//! - Groq: OpenAI-compatible `/chat/completions` with tools

mod groq;
#[cfg(test)]
pub(crate) mod mock;
mod runner;

pub(crate) use groq::GroqModel;
pub(crate) use runner::{AgentRun, CodeAgent};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ToolCall {
    /// Model-assigned id, echoed back with the result.
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model.
    pub arguments: String,
}

/// A conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Message {
    System(String),
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        call_id: String,
        content: String,
    },
}

/// What the model answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    /// The model is done.
    Final(String),
    /// The model wants tools run before it continues.
    ToolCalls {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
}

/// Trait for text-generation services that support tool calling.
#[async_trait]
pub(crate) trait ChatModel: Send + Sync {
    /// Model identifier for display.
    fn name(&self) -> &str;

    /// Sends the conversation and declared tools, returning the next reply.
    async fn complete(&self, messages: &[Message], tools: &Value) -> Result<Reply>;
}
