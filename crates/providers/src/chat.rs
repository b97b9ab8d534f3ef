//! Plain streaming chat over the conversation history.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use ny_domain::config::{ModelConfig, ModelKind};
use ny_domain::error::{Error, Result};
use ny_domain::event::{steps, GenerationEvent};
use ny_domain::stream::{BoxStream, ModelEvent, Usage};
use ny_domain::tool::{ChatMessage, ToolDefinition};
use ny_domain::trace::TraceEvent;

use crate::context::{ContextCache, ContextKey};
use crate::run::{spawn_run, EventSink};
use crate::traits::{ChatModel, ChatRequest, GenerationProvider, GenerationRequest};

/// Upstream request for `turns`, with the model's system prompt first.
pub(crate) fn build_request(
    config: &ModelConfig,
    turns: &[ChatMessage],
    tools: Vec<ToolDefinition>,
) -> ChatRequest {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if let Some(prompt) = &config.system_prompt {
        messages.push(ChatMessage::system(prompt.clone()));
    }
    messages.extend(turns.iter().cloned());
    ChatRequest {
        messages,
        tools,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}

pub(crate) fn trace_llm_request(model: &str, started: Instant, usage: Option<&Usage>) {
    TraceEvent::LlmRequest {
        model: model.to_owned(),
        streaming: true,
        duration_ms: started.elapsed().as_millis() as u64,
        prompt_tokens: usage.map(|u| u.prompt_tokens),
        completion_tokens: usage.map(|u| u.completion_tokens),
    }
    .emit();
}

#[derive(Clone)]
pub struct ChatProvider {
    config: Arc<ModelConfig>,
    model: Arc<dyn ChatModel>,
    contexts: ContextCache,
}

impl ChatProvider {
    pub fn new(config: ModelConfig, model: Arc<dyn ChatModel>, contexts: ContextCache) -> Self {
        Self { config: Arc::new(config), model, contexts }
    }

    async fn run(self, req: GenerationRequest, sink: EventSink) -> Result<()> {
        let started = Instant::now();
        sink.emit(GenerationEvent::step(vec![steps::connecting(&format!(
            "Connecting to {}",
            self.config.id
        ))]))
        .await?;

        let key = ContextKey::new(&self.config.id, &req.user_id, &req.chat_id);
        let mut turns = self.contexts.load(&key, self.config.history_limit).await?;
        turns.push(ChatMessage::user(req.prompt.clone()));

        let request = build_request(&self.config, &turns, Vec::new());
        let call_started = Instant::now();
        let mut upstream = self.model.chat_stream(request).await?;
        sink.emit(GenerationEvent::step(vec![steps::started("Generating answer")]))
            .await?;

        let mut answer = String::new();
        let mut usage = None;
        while let Some(event) = upstream.next().await {
            match event? {
                ModelEvent::Token { text } => {
                    answer.push_str(&text);
                    sink.emit(GenerationEvent::text(text, req.segment_offset)).await?;
                }
                ModelEvent::Done { usage: u, .. } => usage = u.or(usage),
                ModelEvent::Error { message } => {
                    return Err(Error::Provider { provider: self.config.id.clone(), message });
                }
                _ => {}
            }
        }
        trace_llm_request(&self.config.id, call_started, usage.as_ref());

        turns.push(ChatMessage::assistant(answer));
        self.contexts.store(key, turns, self.config.history_limit * 2);

        sink.emit(GenerationEvent::step(vec![steps::finished("Answer generated")]))
            .await?;
        sink.emit(GenerationEvent::duration(started.elapsed().as_secs_f64()))
            .await
    }
}

#[async_trait::async_trait]
impl GenerationProvider for ChatProvider {
    fn model_id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Chat
    }

    async fn stream(
        &self,
        req: GenerationRequest,
    ) -> Result<BoxStream<'static, Result<GenerationEvent>>> {
        if req.is_resume() {
            return Err(Error::InvalidRequest(format!(
                "model '{}' never pauses for review; nothing to resume",
                self.config.id
            )));
        }
        let span = tracing::info_span!(
            "generate",
            model = %self.config.id,
            chat_id = %req.chat_id,
            message_id = %req.message_id,
        );
        let this = self.clone();
        Ok(spawn_run(span, move |sink| this.run(req, sink)))
    }
}
