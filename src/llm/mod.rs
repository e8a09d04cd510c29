//! LLM client module.
//!
//! Trait-based abstraction over the inference call, with the Anthropic
//! Messages API as the concrete implementation. Conversations are sequences
//! of user/assistant messages whose content is a list of blocks: text, tool
//! invocations requested by the model, and tool results sent back to it.

mod anthropic;
mod error;

pub use anthropic::AnthropicClient;
pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Free text
    Text { text: String },
    /// Tool invocation requested by the model
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// Result of a tool invocation, paired with its `ToolUse` by id
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
        }
    }
}

/// A tool invocation extracted from a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    /// Create a user message with a single text block.
    pub fn user_text(text: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Create an assistant message echoing the blocks of a response.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content,
        }
    }

    /// Create the user message that carries tool results back to the model.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        ChatMessage {
            role: Role::User,
            content: results,
        }
    }
}

/// Tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// One inference request.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolDefinition],
    pub max_tokens: u32,
}

/// Response from one inference request.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
    pub model: Option<String>,
}

impl ChatResponse {
    /// Tool invocations in the order the model emitted them.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// The last text block, if any.
    pub fn last_text(&self) -> Option<&str> {
        self.content.iter().rev().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Trait for LLM clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one request carrying the full message history.
    async fn chat_completion(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_blocks_serialize_with_type_tag() {
        let message = ChatMessage::assistant(vec![
            ContentBlock::text("reading"),
            ContentBlock::ToolUse {
                id: "tu_1".to_string(),
                name: "memory_read_project".to_string(),
                input: json!({"project_id": "p1"}),
            },
        ]);

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"][0], json!({"type": "text", "text": "reading"}));
        assert_eq!(value["content"][1]["type"], "tool_use");
        assert_eq!(value["content"][1]["input"]["project_id"], "p1");
    }

    #[test]
    fn test_tool_result_shape() {
        let message =
            ChatMessage::tool_results(vec![ContentBlock::tool_result("tu_1", "{\"ok\":true}")]);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(
            value["content"][0],
            json!({"type": "tool_result", "tool_use_id": "tu_1", "content": "{\"ok\":true}"})
        );
    }

    #[test]
    fn test_response_helpers() {
        let response = ChatResponse {
            content: vec![
                ContentBlock::text("first"),
                ContentBlock::ToolUse {
                    id: "a".into(),
                    name: "x".into(),
                    input: json!({}),
                },
                ContentBlock::text("second"),
            ],
            ..Default::default()
        };
        assert_eq!(response.last_text(), Some("second"));
        assert_eq!(response.tool_calls().len(), 1);
        assert_eq!(response.tool_calls()[0].name, "x");
    }

    #[test]
    fn test_usage_total() {
        assert_eq!(TokenUsage::new(10, 5).total(), 15);
    }
}
