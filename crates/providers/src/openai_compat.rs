//! OpenAI-compatible chat completions client.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio and any other endpoint that
//! follows the chat completions contract.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::traits::{ChatModel, ChatRequest, ChatResponse};
use crate::util::{from_reqwest, resolve_env_secret};
use ny_domain::config::ModelConfig;
use ny_domain::error::{Error, Result};
use ny_domain::stream::{BoxStream, ModelEvent, Usage};
use ny_domain::tool::{ChatMessage, ContentPart, MessageContent, Role, ToolCall, ToolDefinition};
use serde_json::{json, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatModel {
    id: String,
    base_url: String,
    upstream_model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    pub fn from_config(cfg: &ModelConfig, request_timeout: Duration) -> Result<Self> {
        let api_key = resolve_env_secret(cfg.api_key_env.as_deref())?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            upstream_model: cfg.upstream_model.clone(),
            api_key,
            client,
        })
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url).header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();
        let mut body = json!({
            "model": self.upstream_model,
            "messages": messages,
            "stream": stream,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_openai).collect());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = json!(max);
        }
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .post(&self.chat_url())
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.map_err(from_reqwest)?;
        Err(Error::Provider {
            provider: self.id.clone(),
            message: format!("HTTP {} - {}", status.as_u16(), text),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &ChatMessage) -> Value {
    match (&msg.role, &msg.content) {
        (Role::Tool, MessageContent::Parts(parts)) => parts
            .iter()
            .find_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, content, .. } => Some(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                })),
                _ => None,
            })
            .unwrap_or_else(|| json!({ "role": "tool", "tool_call_id": "", "content": "" })),
        (Role::Assistant, MessageContent::Parts(parts)) => {
            let text: Vec<&str> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            let calls: Vec<Value> = msg
                .tool_calls()
                .iter()
                .map(|c| {
                    json!({
                        "id": c.call_id,
                        "type": "function",
                        "function": { "name": c.tool_name, "arguments": c.arguments.to_string() },
                    })
                })
                .collect();
            let mut obj = json!({ "role": "assistant" });
            obj["content"] = if text.is_empty() { Value::Null } else { Value::String(text.join("\n")) };
            if !calls.is_empty() {
                obj["tool_calls"] = Value::Array(calls);
            }
            obj
        }
        (role, content) => json!({
            "role": role_to_str(*role),
            "content": content.text().unwrap_or_default(),
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn provider_error(message: &str) -> Error {
    Error::Provider { provider: "openai_compat".into(), message: message.into() }
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "_raw": raw }))
}

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| provider_error("no choices in response"))?;
    let message = choice
        .get("message")
        .ok_or_else(|| provider_error("no message in choice"))?;

    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let func = tc.get("function")?;
                    Some(ToolCall {
                        call_id: tc.get("id")?.as_str()?.to_string(),
                        tool_name: func.get("name")?.as_str()?.to_string(),
                        arguments: parse_arguments(func.get("arguments")?.as_str().unwrap_or("")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content: message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        tool_calls,
        usage: body.get("usage").and_then(parse_usage),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ── streaming ──────────────────────────────────────────────────────

#[derive(Default)]
struct PartialCall {
    call_id: String,
    name: String,
    arguments: String,
}

/// Assembles streamed tool-call fragments (keyed by their `index`) into
/// complete calls, released when the choice finishes.
#[derive(Default)]
struct StreamState {
    calls: BTreeMap<u64, PartialCall>,
    finish_reason: Option<String>,
    finished: bool,
}

impl StreamState {
    fn parse(&mut self, data: &str) -> Vec<Result<ModelEvent>> {
        if data.trim() == "[DONE]" {
            return self.finish(None);
        }
        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let Some(choice) = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
        else {
            // Usage-only chunk (stream_options.include_usage).
            return match v.get("usage").and_then(parse_usage) {
                Some(usage) => self.finish(Some(usage)),
                None => Vec::new(),
            };
        };

        let mut out = Vec::new();
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                out.push(Ok(ModelEvent::Token { text: text.to_string() }));
            }
        }

        for tc in delta
            .get("tool_calls")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
        {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            let entry = self.calls.entry(index).or_default();
            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                entry.call_id = id.to_string();
                if let Some(name) = tc.pointer("/function/name").and_then(|v| v.as_str()) {
                    entry.name = name.to_string();
                }
                out.push(Ok(ModelEvent::ToolCallStarted {
                    call_id: entry.call_id.clone(),
                    tool_name: entry.name.clone(),
                }));
            }
            if let Some(args) = tc.pointer("/function/arguments").and_then(|v| v.as_str()) {
                if !args.is_empty() {
                    entry.arguments.push_str(args);
                    out.push(Ok(ModelEvent::ToolCallDelta {
                        call_id: entry.call_id.clone(),
                        delta: args.to_string(),
                    }));
                }
            }
        }

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.finish_reason = Some(fr.to_string());
            out.extend(self.release_calls());
        }
        out
    }

    fn release_calls(&mut self) -> Vec<Result<ModelEvent>> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|c| {
                Ok(ModelEvent::ToolCallFinished {
                    call_id: c.call_id,
                    tool_name: c.name,
                    arguments: parse_arguments(&c.arguments),
                })
            })
            .collect()
    }

    fn finish(&mut self, usage: Option<Usage>) -> Vec<Result<ModelEvent>> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut out = self.release_calls();
        out.push(Ok(ModelEvent::Done {
            usage,
            finish_reason: self.finish_reason.take().or_else(|| Some("stop".into())),
        }));
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ChatModel for OpenAiCompatModel {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        tracing::debug!(model = %self.id, upstream = %self.upstream_model, "chat request");
        let body = self.build_chat_body(&req, false);
        let resp = self.send(&body).await?;
        let text = resp.text().await.map_err(from_reqwest)?;
        let json: Value = serde_json::from_str(&text)?;
        parse_chat_response(&json)
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        tracing::debug!(model = %self.id, upstream = %self.upstream_model, "stream request");
        let body = self.build_chat_body(&req, true);
        let resp = self.send(&body).await?;
        let mut state = StreamState::default();
        Ok(crate::sse::sse_response_stream(resp, move |data| state.parse(data)))
    }

    fn name(&self) -> &str {
        &self.upstream_model
    }
}
