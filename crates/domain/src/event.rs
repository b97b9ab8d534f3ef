//! Generation events: the typed units an engine emits while producing one
//! answer. They are folded into a [`crate::message::Message`] and forwarded
//! verbatim to the HTTP client as Server-Sent Events:
//!
//! ```text
//! event: text
//! data: {"id":"…","data":"Hel","index":0}
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event kind
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Step,
    Text,
    Source,
    Duration,
    File,
    Interrupt,
    Error,
    /// Provider-specific extension, folded as an indexed segment.
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Step => "step",
            EventKind::Text => "text",
            EventKind::Source => "source",
            EventKind::Duration => "duration",
            EventKind::File => "file",
            EventKind::Interrupt => "interrupt",
            EventKind::Error => "error",
            EventKind::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "step" => EventKind::Step,
            "text" => EventKind::Text,
            "source" => EventKind::Source,
            "duration" => EventKind::Duration,
            "file" => EventKind::File,
            "interrupt" => EventKind::Interrupt,
            "error" => EventKind::Error,
            other => EventKind::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(EventKind::parse(&s))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The JSON carried on the `data:` line of an SSE frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationEvent {
    pub kind: EventKind,
    pub body: EventBody,
}

impl GenerationEvent {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            body: EventBody {
                id: Some(uuid::Uuid::new_v4().to_string()),
                data,
                index: None,
            },
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.body.index = Some(index);
        self
    }

    pub fn text(text: impl Into<String>, index: usize) -> Self {
        Self::new(EventKind::Text, Value::String(text.into())).with_index(index)
    }

    pub fn step(items: Vec<Value>) -> Self {
        Self::new(EventKind::Step, Value::Array(items))
    }

    pub fn source(items: Vec<Value>) -> Self {
        Self::new(EventKind::Source, Value::Array(items))
    }

    pub fn duration(seconds: f64) -> Self {
        Self::new(EventKind::Duration, json!({ "seconds": seconds }))
    }

    pub fn file(payload: Value) -> Self {
        Self::new(EventKind::File, payload)
    }

    pub fn interrupt(payload: Value) -> Self {
        Self::new(EventKind::Interrupt, payload)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, json!({ "message": message.into() }))
    }

    pub fn is_interrupt(&self) -> bool {
        self.kind == EventKind::Interrupt
    }

    /// The `data:` line payload.
    pub fn body_json(&self) -> String {
        serde_json::to_string(&self.body).unwrap_or_default()
    }

    /// Encode as one complete SSE frame, terminated by a blank line.
    pub fn to_sse_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.kind, self.body_json())
    }

    /// Decode a single SSE frame produced by [`Self::to_sse_frame`].
    /// Multiple `data:` lines are joined with `\n` as SSE requires.
    pub fn from_sse_frame(frame: &str) -> Result<Self> {
        let mut kind = None;
        let mut data = Vec::new();
        for line in frame.lines() {
            if let Some(v) = line.strip_prefix("event:") {
                kind = Some(EventKind::parse(v.trim()));
            } else if let Some(v) = line.strip_prefix("data:") {
                data.push(v.strip_prefix(' ').unwrap_or(v));
            }
        }
        let kind = kind.ok_or_else(|| Error::InvalidRequest("SSE frame without event line".into()))?;
        if data.is_empty() {
            return Err(Error::InvalidRequest(format!("SSE frame '{kind}' without data")));
        }
        let body: EventBody = serde_json::from_str(&data.join("\n"))?;
        Ok(Self { kind, body })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Step items
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builders for the items carried by `step` events.
pub mod steps {
    use serde_json::{json, Value};

    /// Step type an engine emits once a review is durably settled.
    pub const RESUMED: &str = "resumed";

    pub fn connecting(title: &str) -> Value {
        json!({ "type": "connecting", "title": title })
    }

    pub fn started(title: &str) -> Value {
        json!({ "type": "started", "title": title })
    }

    pub fn finished(title: &str) -> Value {
        json!({ "type": "finished", "title": title })
    }

    pub fn info(title: &str) -> Value {
        json!({ "type": "info", "title": title })
    }

    pub fn tool_call(call_id: &str, name: &str, args: &Value) -> Value {
        json!({ "type": "tool_call", "tool_id": call_id, "title": name, "args": args })
    }

    pub fn tool_result(call_id: &str, name: &str, content: &str) -> Value {
        json!({ "type": "tool_result", "tool_id": call_id, "title": name, "content": content })
    }

    pub fn resumed(title: &str) -> Value {
        json!({ "type": RESUMED, "title": title })
    }

    pub fn decision(interrupt_id: &str, verdict: &str, comment: Option<&str>) -> Value {
        json!({
            "type": "decision",
            "interrupt_id": interrupt_id,
            "verdict": verdict,
            "comment": comment,
        })
    }
}
