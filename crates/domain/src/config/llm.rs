use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model id used when a request names none, or an unknown one.
    #[serde(default = "d_default_model")]
    pub default_model: String,
    #[serde(default = "d_60000")]
    pub request_timeout_ms: u64,
    /// Conversation contexts kept in memory, keyed by (model, user, chat).
    #[serde(default = "d_128")]
    pub context_cache_capacity: usize,
    /// Registered models (data-driven: adding a model = adding config).
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model: d_default_model(),
            request_timeout_ms: 60_000,
            context_cache_capacity: 128,
            models: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Plain streaming chat over the conversation history.
    #[default]
    Chat,
    /// Checkpointed tool-calling loop with human review of restricted tools.
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Public model id clients select (e.g. `noney-chat`).
    pub id: String,
    #[serde(default)]
    pub kind: ModelKind,
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Environment variable holding the bearer token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Model name sent upstream.
    pub upstream_model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Stored messages loaded into a fresh context.
    #[serde(default = "d_50")]
    pub history_limit: usize,
    /// Model round-trips an agent may take within one request.
    #[serde(default = "d_8")]
    pub max_steps: usize,
    /// Tool names (from `[[tools.http]]`) exposed to this model.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Tools that are restricted actions: calling them pauses the agent
    /// until a reviewer approves or rejects.
    #[serde(default)]
    pub approval_required: Vec<String>,
}

fn d_default_model() -> String {
    "noney-chat".into()
}
fn d_60000() -> u64 {
    60_000
}
fn d_128() -> usize {
    128
}
fn d_50() -> usize {
    50
}
fn d_8() -> usize {
    8
}
