use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for model output and generation events.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Raw events produced by a chat model while streaming (provider-agnostic).
///
/// Engines fold these into [`crate::event::GenerationEvent`]s; they never
/// reach the HTTP client directly.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ModelEvent {
    #[serde(rename = "token")]
    Token { text: String },

    #[serde(rename = "tool_call_started")]
    ToolCallStarted { call_id: String, tool_name: String },

    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with full arguments.
    #[serde(rename = "tool_call_finished")]
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
