use futures_util::StreamExt;
use ny_domain::config::ModelKind;
use ny_domain::error::Result;
use ny_domain::event::{EventKind, GenerationEvent};
use ny_domain::message::{Decision, InterruptPayload};
use ny_domain::stream::{BoxStream, ModelEvent, Usage};
use ny_domain::tool::{ChatMessage, ToolCall, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat model (upstream LLM client)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// `None` lets the upstream choose.
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

/// Client for one upstream language model.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// Send a request and wait for the full response.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// Send a request and stream tokens and assembled tool calls.
    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<ModelEvent>>>;

    /// Upstream model name, for logs.
    fn name(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generation provider (engine behind /v1/generate)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One generation request as seen by an engine.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub message_id: String,
    pub chat_id: String,
    pub user_id: String,
    pub prompt: String,
    /// Non-empty on a resume.
    pub decisions: Vec<Decision>,
    /// The interrupt the decisions answer, as recorded on the message.
    pub pending_interrupt: Option<InterruptPayload>,
    /// Answer index the first new text segment goes to.
    pub segment_offset: usize,
}

impl GenerationRequest {
    pub fn is_resume(&self) -> bool {
        !self.decisions.is_empty()
    }
}

/// A selectable model: produces the typed event stream for a request.
#[async_trait::async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_id(&self) -> &str;

    fn kind(&self) -> ModelKind;

    async fn stream(
        &self,
        req: GenerationRequest,
    ) -> Result<BoxStream<'static, Result<GenerationEvent>>>;

    /// Run to completion and return the answer text.
    async fn invoke(&self, req: GenerationRequest) -> Result<String> {
        let mut events = self.stream(req).await?;
        let mut text = String::new();
        while let Some(event) = events.next().await {
            let event = event?;
            if event.kind == EventKind::Text {
                if let Some(t) = event.body.data.as_str() {
                    text.push_str(t);
                }
            }
        }
        Ok(text)
    }
}
