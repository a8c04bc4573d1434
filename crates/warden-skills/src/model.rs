//! Language-model abstraction.
//!
//! The runtime treats the model as a black box: messages and a tool
//! catalogue go in, text and tool-call requests come out. Provider
//! adapters implement [`ChatModel`] outside the core.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Model-assigned call id, echoed back on the result message.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One message in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set on `Tool` role messages: which call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(content: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Catalogue entry shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub input_schema: Value,
}

/// One model turn: final text, or tool calls to execute (or both).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

/// A chat-capable language model.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// One completion: the full message log and the available tools go in,
    /// the assistant's turn comes out.
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelTurn>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let msg = ChatMessage::system("be helpful");
        assert_eq!(msg.role, ChatRole::System);
        assert!(msg.tool_calls.is_empty());

        let msg = ChatMessage::tool("{\"ok\":true}", "call_1");
        assert_eq!(msg.role, ChatRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn message_serialization_skips_empty_fields() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn turn_roundtrip() {
        let turn = ModelTurn {
            text: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call_1".into(),
                name: "fs.read".into(),
                arguments: serde_json::json!({"path": "a.txt"}),
            }],
        };
        let json = serde_json::to_string(&turn).unwrap();
        let back: ModelTurn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, turn);
    }
}
