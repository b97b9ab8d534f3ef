//! Checkpointed tool-calling agent with human review of restricted tools.
//!
//! The conversation lives in the `messages` channel of the chat's
//! checkpoint thread, and every model round ends with a new checkpoint.
//! When the model calls a tool listed in `approval_required`, the run
//! stops: the interrupt payload is stored as a pending write on the
//! interrupt channel of the latest checkpoint and an `interrupt` event is
//! the last thing emitted. A resume request re-loads that checkpoint,
//! records the decisions on the resume channel, settles the gated calls
//! and carries on with the loop. Each settled call's result is stored as a
//! pending write (task id = call id) before the next checkpoint, so a
//! resume replayed after a failure reuses it instead of running the tool
//! again.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use ny_checkpoint::{ChannelVersions, Checkpoint, CheckpointAddress, CheckpointStore, CheckpointView, Metadata};
use ny_domain::config::{ModelConfig, ModelKind, INTERRUPT_CHANNEL, RESUME_CHANNEL};
use ny_domain::error::{Error, Result};
use ny_domain::event::{steps, GenerationEvent};
use ny_domain::message::{ActionRequest, Decision, InterruptPayload, Verdict};
use ny_domain::stream::{BoxStream, ModelEvent};
use ny_domain::tool::{ChatMessage, ToolCall};
use ny_domain::trace::TraceEvent;
use serde_json::{json, Value};

use crate::chat::{build_request, trace_llm_request};
use crate::run::{spawn_run, EventSink};
use crate::tools::ToolRegistry;
use crate::traits::{ChatModel, GenerationProvider, GenerationRequest};

/// Channel holding the conversation turns.
pub const MESSAGES_CHANNEL: &str = "messages";

/// Pending-write channel for results of reviewed tool calls.
pub const TOOL_RESULTS_CHANNEL: &str = "tool_results";

const SUPERSEDED: &str = "Not executed: the conversation moved on to a new prompt before review.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The agent's view of its checkpoint thread during one request.
struct ThreadState {
    position: CheckpointAddress,
    checkpoint: Option<Checkpoint>,
    turns: Vec<ChatMessage>,
    step: i64,
}

impl ThreadState {
    fn new(position: CheckpointAddress) -> Self {
        Self { position, checkpoint: None, turns: Vec::new(), step: 0 }
    }

    fn from_view(view: &CheckpointView) -> Result<Self> {
        if view.missing_channels.iter().any(|c| c == MESSAGES_CHANNEL) {
            return Err(Error::Integrity(format!(
                "checkpoint {} references a missing '{MESSAGES_CHANNEL}' blob",
                view.checkpoint_id()
            )));
        }
        let turns = match view.checkpoint.channel_values.get(MESSAGES_CHANNEL) {
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                Error::Integrity(format!("checkpoint {} holds malformed turns: {e}", view.checkpoint_id()))
            })?,
            None => Vec::new(),
        };
        Ok(Self {
            position: view.address.clone(),
            checkpoint: Some(view.checkpoint.clone()),
            turns,
            step: view.metadata.get("step").and_then(Value::as_i64).unwrap_or(0),
        })
    }

    /// Record the current turns as the next checkpoint of the thread.
    async fn save(&mut self, store: &CheckpointStore, source: &str, message_id: &str) -> Result<()> {
        let mut next = match &self.checkpoint {
            Some(cp) => cp.successor(),
            None => Checkpoint::empty(),
        };
        let turns = serde_json::to_value(&self.turns).map_err(|e| Error::Serialization(e.to_string()))?;
        let mut new_versions = ChannelVersions::new();
        next.update_channel(MESSAGES_CHANNEL, turns, &mut new_versions)?;
        self.step += 1;
        next.payload = json!({ "step": self.step });

        let mut metadata = Metadata::new();
        metadata.insert("source".into(), json!(source));
        metadata.insert("step".into(), json!(self.step));
        metadata.insert("message_id".into(), json!(message_id));

        self.position = store.put(&self.position, next.clone(), metadata, &new_versions).await?;
        self.checkpoint = Some(next);
        Ok(())
    }
}

fn decode_payload(value: &Value) -> Result<InterruptPayload> {
    serde_json::from_value(value.clone())
        .map_err(|e| Error::Integrity(format!("malformed interrupt write: {e}")))
}

/// Tool result a previous attempt recorded for `call_id` on this checkpoint.
fn settled_result(view: &CheckpointView, call_id: &str) -> Result<Option<ChatMessage>> {
    let Some(write) = view
        .pending_writes
        .iter()
        .find(|w| w.channel == TOOL_RESULTS_CHANNEL && w.task_id == call_id)
    else {
        return Ok(None);
    };
    serde_json::from_value(write.value.clone())
        .map(Some)
        .map_err(|e| Error::Integrity(format!("malformed tool result write for '{call_id}': {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct AgentProvider {
    config: Arc<ModelConfig>,
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    checkpoints: CheckpointStore,
}

impl AgentProvider {
    pub fn new(
        config: ModelConfig,
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        checkpoints: CheckpointStore,
    ) -> Self {
        Self { config: Arc::new(config), model, tools, checkpoints }
    }

    fn requires_approval(&self, tool: &str) -> bool {
        self.config.approval_required.iter().any(|t| t == tool)
    }

    async fn load(&self, chat_id: &str) -> Result<(ThreadState, Option<CheckpointView>)> {
        let latest = self.checkpoints.latest(chat_id);
        match self.checkpoints.get_tuple(&latest).await? {
            Some(view) => Ok((ThreadState::from_view(&view)?, Some(view))),
            None => Ok((ThreadState::new(latest), None)),
        }
    }

    async fn run(self, req: GenerationRequest, sink: EventSink) -> Result<()> {
        let started = Instant::now();
        let (mut thread, view) = self.load(&req.chat_id).await?;

        if req.is_resume() {
            let view = view.ok_or_else(|| {
                Error::Integrity(format!("chat {} has no checkpoint to resume from", req.chat_id))
            })?;
            sink.emit(GenerationEvent::step(vec![steps::connecting("Resuming after review")]))
                .await?;
            self.settle_decisions(&req, &view, &mut thread, &sink).await?;
            thread.save(&self.checkpoints, "resume", &req.message_id).await?;
            sink.emit(GenerationEvent::step(vec![steps::resumed("Review settled")]))
                .await?;
        } else {
            sink.emit(GenerationEvent::step(vec![steps::connecting(&format!(
                "Connecting to {}",
                self.config.id
            ))]))
            .await?;
            if let Some(view) = &view {
                self.close_stale_interrupt(view, &mut thread)?;
            }
            thread.turns.push(ChatMessage::user(req.prompt.clone()));
            thread.save(&self.checkpoints, "input", &req.message_id).await?;
        }

        self.tool_loop(&req, &mut thread, &sink, started).await
    }

    /// A fresh prompt on a thread paused for review abandons the gated
    /// calls; each still needs a tool result before the next model call.
    fn close_stale_interrupt(&self, view: &CheckpointView, thread: &mut ThreadState) -> Result<()> {
        let Some(write) = view.pending_write(INTERRUPT_CHANNEL) else {
            return Ok(());
        };
        if view.pending_write(RESUME_CHANNEL).is_some() {
            return Ok(());
        }
        let payload = decode_payload(&write.value)?;
        tracing::info!(
            chat_id = %view.address.thread_id,
            requests = payload.requests.len(),
            "new prompt supersedes pending review"
        );
        for request in &payload.requests {
            thread.turns.push(ChatMessage::tool_error(request.call_id.clone(), SUPERSEDED));
        }
        Ok(())
    }

    async fn settle_decisions(
        &self,
        req: &GenerationRequest,
        view: &CheckpointView,
        thread: &mut ThreadState,
        sink: &EventSink,
    ) -> Result<()> {
        let write = view.pending_write(INTERRUPT_CHANNEL).ok_or_else(|| {
            Error::Integrity(format!("chat {} has no outstanding interrupt", req.chat_id))
        })?;
        let payload = decode_payload(&write.value)?;
        if let Some(recorded) = &req.pending_interrupt {
            if recorded != &payload {
                return Err(Error::Integrity(format!(
                    "interrupt on message {} does not match the checkpoint of chat {}",
                    req.message_id, req.chat_id
                )));
            }
        }
        payload.validate(&req.decisions)?;

        let decisions = serde_json::to_value(&req.decisions).map_err(|e| Error::Serialization(e.to_string()))?;
        if let Some(previous) = view.pending_write(RESUME_CHANNEL) {
            if previous.value != decisions {
                return Err(Error::Integrity(format!(
                    "interrupt in chat {} was already resolved with different decisions",
                    req.chat_id
                )));
            }
            tracing::warn!(chat_id = %req.chat_id, "replaying a resume that did not complete");
        }
        self.checkpoints
            .put_writes(&thread.position, &req.message_id, &[(RESUME_CHANNEL.to_string(), decisions)])
            .await?;

        for request in &payload.requests {
            let decision = req
                .decisions
                .iter()
                .find(|d| d.interrupt_id == request.interrupt_id)
                .ok_or_else(|| Error::Integrity(format!("no decision for '{}'", request.interrupt_id)))?;
            sink.emit(GenerationEvent::step(vec![steps::decision(
                &request.interrupt_id,
                decision.verdict.as_str(),
                decision.comment.as_deref(),
            )]))
            .await?;
            if let Some(settled) = settled_result(view, &request.call_id)? {
                tracing::info!(
                    chat_id = %req.chat_id,
                    call_id = %request.call_id,
                    "reusing result recorded by an earlier attempt"
                );
                sink.emit(GenerationEvent::step(vec![steps::tool_result(
                    &request.call_id,
                    &request.action,
                    settled.tool_output().unwrap_or_default(),
                )]))
                .await?;
                thread.turns.push(settled);
                continue;
            }
            let result = self.settle(request, decision, sink).await?;
            let value = serde_json::to_value(&result).map_err(|e| Error::Serialization(e.to_string()))?;
            self.checkpoints
                .put_writes(&thread.position, &request.call_id, &[(TOOL_RESULTS_CHANNEL.to_string(), value)])
                .await?;
            thread.turns.push(result);
        }
        Ok(())
    }

    async fn settle(&self, request: &ActionRequest, decision: &Decision, sink: &EventSink) -> Result<ChatMessage> {
        match decision.verdict {
            Verdict::Approve => {
                let call = ToolCall {
                    call_id: request.call_id.clone(),
                    tool_name: request.action.clone(),
                    arguments: request.args.clone(),
                };
                self.execute(&call, sink).await
            }
            Verdict::Reject => {
                let content = match decision.comment.as_deref() {
                    Some(comment) if !comment.trim().is_empty() => {
                        format!("The reviewer rejected this action: {comment}")
                    }
                    _ => "The reviewer rejected this action.".to_string(),
                };
                sink.emit(GenerationEvent::step(vec![steps::tool_result(
                    &request.call_id,
                    &request.action,
                    &content,
                )]))
                .await?;
                Ok(ChatMessage::tool_error(request.call_id.clone(), content))
            }
        }
    }

    /// Run a tool. Tool failures go back to the model as error results.
    async fn execute(&self, call: &ToolCall, sink: &EventSink) -> Result<ChatMessage> {
        let (content, failed) = match self.tools.call(&call.tool_name, &call.arguments).await {
            Ok(out) => (out, false),
            Err(e) => {
                tracing::warn!(tool = %call.tool_name, call_id = %call.call_id, error = %e, "tool call failed");
                (format!("Tool error: {e}"), true)
            }
        };
        sink.emit(GenerationEvent::step(vec![steps::tool_result(
            &call.call_id,
            &call.tool_name,
            &content,
        )]))
        .await?;
        Ok(if failed {
            ChatMessage::tool_error(call.call_id.clone(), content)
        } else {
            ChatMessage::tool_result(call.call_id.clone(), content)
        })
    }

    async fn tool_loop(
        &self,
        req: &GenerationRequest,
        thread: &mut ThreadState,
        sink: &EventSink,
        started: Instant,
    ) -> Result<()> {
        let definitions = self.tools.definitions(&self.config.tools);
        let mut segment = req.segment_offset;
        let mut segment_open = false;

        for _ in 0..self.config.max_steps {
            let request = build_request(&self.config, &thread.turns, definitions.clone());
            let call_started = Instant::now();
            let mut upstream = self.model.chat_stream(request).await?;

            let mut text = String::new();
            let mut calls = Vec::new();
            let mut usage = None;
            while let Some(event) = upstream.next().await {
                match event? {
                    ModelEvent::Token { text: t } => {
                        text.push_str(&t);
                        segment_open = true;
                        sink.emit(GenerationEvent::text(t, segment)).await?;
                    }
                    ModelEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                        calls.push(ToolCall { call_id, tool_name, arguments });
                    }
                    ModelEvent::Done { usage: u, .. } => usage = u.or(usage),
                    ModelEvent::Error { message } => {
                        return Err(Error::Provider { provider: self.config.id.clone(), message });
                    }
                    _ => {}
                }
            }
            trace_llm_request(&self.config.id, call_started, usage.as_ref());

            if calls.is_empty() {
                thread.turns.push(ChatMessage::assistant(text));
                thread.save(&self.checkpoints, "loop", &req.message_id).await?;
                sink.emit(GenerationEvent::step(vec![steps::finished("Answer generated")]))
                    .await?;
                return sink
                    .emit(GenerationEvent::duration(started.elapsed().as_secs_f64()))
                    .await;
            }

            thread.turns.push(ChatMessage::assistant_tool_calls(&text, &calls));
            if segment_open {
                segment += 1;
                segment_open = false;
            }
            sink.emit(GenerationEvent::step(
                calls
                    .iter()
                    .map(|c| steps::tool_call(&c.call_id, &c.tool_name, &c.arguments))
                    .collect(),
            ))
            .await?;

            let (gated, free): (Vec<ToolCall>, Vec<ToolCall>) =
                calls.into_iter().partition(|c| self.requires_approval(&c.tool_name));
            for call in &free {
                let result = self.execute(call, sink).await?;
                thread.turns.push(result);
            }

            thread.save(&self.checkpoints, "loop", &req.message_id).await?;
            if !gated.is_empty() {
                return self.interrupt(req, thread, gated, sink).await;
            }
        }

        Err(Error::Other(format!(
            "agent '{}' used its {} steps without a final answer",
            self.config.id, self.config.max_steps
        )))
    }

    /// Pause for review. Everything is durable before the event goes out.
    async fn interrupt(
        &self,
        req: &GenerationRequest,
        thread: &ThreadState,
        gated: Vec<ToolCall>,
        sink: &EventSink,
    ) -> Result<()> {
        let payload = InterruptPayload {
            requests: gated
                .into_iter()
                .map(|call| ActionRequest {
                    interrupt_id: uuid::Uuid::new_v4().to_string(),
                    description: self
                        .tools
                        .get(&call.tool_name)
                        .map(|t| t.definition().description)
                        .filter(|d| !d.is_empty())
                        .unwrap_or_else(|| format!("'{}' requires approval", call.tool_name)),
                    call_id: call.call_id,
                    action: call.tool_name,
                    args: call.arguments,
                })
                .collect(),
        };
        let value = payload.to_value()?;
        self.checkpoints
            .put_writes(&thread.position, &req.message_id, &[(INTERRUPT_CHANNEL.to_string(), value.clone())])
            .await?;

        TraceEvent::InterruptRaised {
            chat_id: req.chat_id.clone(),
            message_id: req.message_id.clone(),
            interrupt_ids: payload.requests.iter().map(|r| r.interrupt_id.clone()).collect(),
        }
        .emit();
        sink.emit(GenerationEvent::interrupt(value)).await
    }
}

#[async_trait::async_trait]
impl GenerationProvider for AgentProvider {
    fn model_id(&self) -> &str {
        &self.config.id
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Agent
    }

    async fn stream(
        &self,
        req: GenerationRequest,
    ) -> Result<BoxStream<'static, Result<GenerationEvent>>> {
        let span = tracing::info_span!(
            "generate",
            model = %self.config.id,
            chat_id = %req.chat_id,
            message_id = %req.message_id,
            resume = req.is_resume(),
        );
        let this = self.clone();
        Ok(spawn_run(span, move |sink| this.run(req, sink)))
    }
}
