use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The persisted result of one generation request (and of any resumes of
/// it). Written as a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Conversation thread this message belongs to.
    pub chat_id: String,
    #[serde(default)]
    pub prompt: String,
    /// Answer segments, positioned by the event `index`.
    #[serde(default)]
    pub answer: Vec<AnswerSegment>,
    #[serde(default)]
    pub steps: Vec<Value>,
    #[serde(default)]
    pub sources: Vec<Value>,
    #[serde(default)]
    pub answer_files: Vec<Value>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub interrupt: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSegment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl Message {
    pub fn new(id: impl Into<String>, chat_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            chat_id: chat_id.into(),
            prompt: prompt.into(),
            answer: Vec::new(),
            steps: Vec::new(),
            sources: Vec::new(),
            answer_files: Vec::new(),
            duration: None,
            interrupt: None,
            model: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Concatenated text of all `text` segments.
    pub fn answer_text(&self) -> String {
        self.answer
            .iter()
            .filter(|s| s.kind == "text")
            .filter_map(|s| s.data.as_str())
            .collect()
    }

    /// The outstanding interrupt, decoded.
    pub fn pending_interrupt(&self) -> Result<Option<InterruptPayload>> {
        match &self.interrupt {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|e| Error::Integrity(format!("message {} has a malformed interrupt: {e}", self.id))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interrupts & decisions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Restricted actions awaiting human review. Carried by the `interrupt`
/// event and stored on the message until a resume request decides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptPayload {
    pub requests: Vec<ActionRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub interrupt_id: String,
    /// Tool call this request gates.
    pub call_id: String,
    pub action: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approve,
    Reject,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Approve => "approve",
            Verdict::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub interrupt_id: String,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl InterruptPayload {
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn request(&self, interrupt_id: &str) -> Option<&ActionRequest> {
        self.requests.iter().find(|r| r.interrupt_id == interrupt_id)
    }

    /// Check that `decisions` answer exactly the outstanding requests.
    pub fn validate(&self, decisions: &[Decision]) -> Result<()> {
        if decisions.is_empty() {
            return Err(Error::InvalidRequest("resume requires at least one decision".into()));
        }
        let mut seen = HashSet::new();
        for d in decisions {
            if self.request(&d.interrupt_id).is_none() {
                return Err(Error::Integrity(format!(
                    "decision references unknown interrupt id '{}'",
                    d.interrupt_id
                )));
            }
            if !seen.insert(d.interrupt_id.as_str()) {
                return Err(Error::Integrity(format!(
                    "duplicate decision for interrupt id '{}'",
                    d.interrupt_id
                )));
            }
        }
        if let Some(missing) = self
            .requests
            .iter()
            .find(|r| !seen.contains(r.interrupt_id.as_str()))
        {
            return Err(Error::Integrity(format!(
                "no decision for outstanding interrupt '{}'",
                missing.interrupt_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> InterruptPayload {
        InterruptPayload {
            requests: vec![ActionRequest {
                interrupt_id: "i1".into(),
                call_id: "c1".into(),
                action: "generate_csv".into(),
                args: Value::Null,
                description: String::new(),
            }],
        }
    }

    fn decision(id: &str) -> Decision {
        Decision { interrupt_id: id.into(), verdict: Verdict::Approve, comment: None }
    }

    #[test]
    fn matching_decisions_validate() {
        payload().validate(&[decision("i1")]).unwrap();
    }

    #[test]
    fn unknown_interrupt_id_is_integrity_violation() {
        let err = payload().validate(&[decision("i1"), decision("nope")]).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn undecided_request_is_integrity_violation() {
        let mut p = payload();
        p.requests.push(ActionRequest {
            interrupt_id: "i2".into(),
            call_id: "c2".into(),
            action: "logout".into(),
            args: Value::Null,
            description: String::new(),
        });
        assert!(p.validate(&[decision("i1")]).unwrap_err().is_integrity());
    }

    #[test]
    fn empty_decisions_are_invalid() {
        assert!(matches!(payload().validate(&[]), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn verdict_serializes_lowercase() {
        let d: Decision =
            serde_json::from_str(r#"{"interrupt_id":"i1","verdict":"reject","comment":"no"}"#).unwrap();
        assert_eq!(d.verdict, Verdict::Reject);
        assert_eq!(d.comment.as_deref(), Some("no"));
    }

    #[test]
    fn message_reads_back_its_interrupt() {
        let mut m = Message::new("m1", "t1", "hi");
        assert!(m.pending_interrupt().unwrap().is_none());
        m.interrupt = Some(payload().to_value().unwrap());
        assert_eq!(m.pending_interrupt().unwrap(), Some(payload()));
    }
}
