//! Mock chat model for testing.
//!
//! Replays scripted replies in order and records every conversation it was
//! shown, so loop tests can assert on what the model saw.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use super::{ChatModel, Message, Reply, ToolCall};

/// A single scripted reply.
#[derive(Debug, Clone)]
pub(crate) enum MockReply {
    /// Call one tool with the given JSON arguments.
    Call { name: String, arguments: String },
    /// Finish with this answer.
    Final(String),
    /// Fail the request.
    Error(String),
}

impl MockReply {
    pub fn call(name: &str, arguments: Value) -> Self {
        Self::Call {
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    pub fn answer(text: &str) -> Self {
        Self::Final(text.to_string())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockChatModel {
    replies: Arc<Vec<MockReply>>,
    seen: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockChatModel {
    /// Replies in order; once exhausted the last reply repeats.
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Arc::new(replies),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn invocation_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// The conversation passed on the `n`th call.
    pub fn conversation(&self, n: usize) -> Vec<Message> {
        self.seen.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, messages: &[Message], _tools: &Value) -> Result<Reply> {
        let count = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(messages.to_vec());
            seen.len() - 1
        };
        let reply = &self.replies[count.min(self.replies.len() - 1)];

        match reply {
            MockReply::Call { name, arguments } => Ok(Reply::ToolCalls {
                content: None,
                calls: vec![ToolCall {
                    id: format!("call_{count}"),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }],
            }),
            MockReply::Final(text) => Ok(Reply::Final(text.clone())),
            MockReply::Error(msg) => anyhow::bail!("{msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_replays_in_order_then_repeats_last() {
        let model = MockChatModel::new(vec![
            MockReply::call("search_tool", json!({"search_query": "q"})),
            MockReply::answer("done"),
        ]);

        let first = model.complete(&[], &json!([])).await.unwrap();
        assert!(matches!(first, Reply::ToolCalls { ref calls, .. } if calls[0].id == "call_0"));
        assert_eq!(
            model.complete(&[], &json!([])).await.unwrap(),
            Reply::Final("done".into())
        );
        assert_eq!(
            model.complete(&[], &json!([])).await.unwrap(),
            Reply::Final("done".into())
        );
        assert_eq!(model.invocation_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_records_conversations() {
        let model = MockChatModel::new(vec![MockReply::Error("boom".into())]);
        let err = model
            .complete(&[Message::User("hello".into())], &json!([]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(model.conversation(0), vec![Message::User("hello".into())]);
    }
}
