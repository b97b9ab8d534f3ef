use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// One turn of the conversation sent to a chat model. Distinct from the
/// persisted [`crate::message::Message`] record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: MessageContent::Text(text.into()) }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    /// An assistant turn that requested tool calls, optionally with text.
    pub fn assistant_tool_calls(text: &str, calls: &[ToolCall]) -> Self {
        let mut parts = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            parts.push(ContentPart::Text { text: text.to_owned() });
        }
        parts.extend(calls.iter().map(|c| ContentPart::ToolUse {
            id: c.call_id.clone(),
            name: c.tool_name.clone(),
            input: c.arguments.clone(),
        }));
        Self { role: Role::Assistant, content: MessageContent::Parts(parts) }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::tool_outcome(tool_use_id, content, false)
    }

    pub fn tool_error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::tool_outcome(tool_use_id, content, true)
    }

    fn tool_outcome(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error,
            }]),
        }
    }

    /// Content of a tool-result turn.
    pub fn tool_output(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(_) => None,
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::ToolResult { content, .. } => Some(content.as_str()),
                _ => None,
            }),
        }
    }

    /// Tool calls carried by an assistant turn.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolUse { id, name, input } => Some(ToolCall {
                        call_id: id.clone(),
                        tool_name: name.clone(),
                        arguments: input.clone(),
                    }),
                    _ => None,
                })
                .collect(),
        }
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }
}
