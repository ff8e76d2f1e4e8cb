//! Groq chat-completions client.
//!
//! Speaks the OpenAI-compatible protocol: messages plus a `tools` array in,
//! either `tool_calls` or plain content out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{ChatModel, Message, Reply, ToolCall};
use crate::config::ModelConfig;

pub(crate) const API_KEY_VAR: &str = "GROQ_API_KEY";
pub(crate) const MODEL_VAR: &str = "GROQ_MODEL";

/// Chat model served by Groq (or any OpenAI-compatible endpoint).
pub(crate) struct GroqModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GroqModel {
    pub fn new(config: &ModelConfig, api_key: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model,
            temperature: config.temperature,
        })
    }

    /// Reads `GROQ_API_KEY`, and `GROQ_MODEL` unless the config names a model.
    pub fn from_env(config: &ModelConfig) -> Result<Self> {
        let api_key = non_empty_var(API_KEY_VAR)
            .with_context(|| format!("{API_KEY_VAR} is not set"))?;
        let model = config
            .model
            .clone()
            .or_else(|| non_empty_var(MODEL_VAR))
            .with_context(|| format!("No model configured: set [model].model or {MODEL_VAR}"))?;
        Self::new(config, api_key, model)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// Wire format

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<WireMessage>,
    tools: &'a Value,
    tool_choice: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let plain = |role: &str, content: &str| Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        };
        match message {
            Message::System(text) => plain("system", text),
            Message::User(text) => plain("user", text),
            Message::Assistant {
                content,
                tool_calls,
            } => Self {
                role: "assistant".to_string(),
                content: content.clone(),
                tool_calls: tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: function_type(),
                        function: WireFunction {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                    .collect(),
                tool_call_id: None,
            },
            Message::Tool { call_id, content } => Self {
                tool_call_id: Some(call_id.clone()),
                ..plain("tool", content)
            },
        }
    }
}

fn into_reply(message: WireMessage) -> Reply {
    if message.tool_calls.is_empty() {
        return Reply::Final(message.content.unwrap_or_default());
    }
    Reply::ToolCalls {
        content: message.content.filter(|c| !c.trim().is_empty()),
        calls: message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect(),
    }
}

#[async_trait]
impl ChatModel for GroqModel {
    fn name(&self) -> &str {
        &self.model
    }

    #[allow(tail_expr_drop_order)]
    async fn complete(&self, messages: &[Message], tools: &Value) -> Result<Reply> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools,
            tool_choice: "auto",
        };

        debug!(
            "Requesting completion: model={}, messages={}",
            self.model,
            messages.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion returned {status}: {body}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .context("Chat completion response had no choices")?;
        Ok(into_reply(choice.message))
    }
}
