//! Generation endpoint: the primary interface for producing answers.
//!
//! - `POST /v1/generate`: SSE stream of generation events. A body with a
//!   non-empty `descisions` list resumes an interrupted message instead of
//!   starting a new one.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;

use ny_domain::event::GenerationEvent;
use ny_domain::message::Decision;

use crate::api::{api_error, error_response};
use crate::runtime::generate::{start_generation, StartError};
use crate::runtime::interrupt::GenerateInput;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    /// Message id, chosen by the client. Reusing the id of an interrupted
    /// message together with decisions resumes it.
    pub id: String,
    /// Chat (thread) the message belongs to.
    #[serde(alias = "chat_id")]
    pub chat_uid: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub model: Option<ModelRef>,
    /// Caller identity, part of the conversation context key.
    #[serde(default)]
    pub user: Option<String>,
    /// Review decisions. The misspelt name is the wire format; `decisions`
    /// is accepted too.
    #[serde(default, alias = "decisions")]
    pub descisions: Vec<Decision>,
}

#[derive(Debug, Deserialize)]
pub struct ModelRef {
    pub id: String,
}

impl GenerateBody {
    fn into_input(self) -> GenerateInput {
        GenerateInput {
            message_id: self.id,
            chat_id: self.chat_uid,
            user_id: self.user.unwrap_or_else(|| "anonymous".into()),
            prompt: self.prompt,
            model: self.model.map(|m| m.id),
            decisions: self.descisions,
        }
    }
}

/// Ids become document path segments.
fn check_id(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if value.contains('/') || value == "." || value == ".." {
        return Err(format!("{field} '{value}' is not a valid id"));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/generate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Response {
    if let Err(msg) = check_id("id", &body.id).and_then(|_| check_id("chat_uid", &body.chat_uid)) {
        return api_error(StatusCode::BAD_REQUEST, msg);
    }

    match start_generation(&state, body.into_input()).await {
        Ok(rx) => Sse::new(make_sse_stream(rx))
            .keep_alive(KeepAlive::default())
            .into_response(),
        Err(StartError::Busy(busy)) => api_error(StatusCode::CONFLICT, busy.to_string()),
        Err(StartError::Rejected(e)) => error_response(&e),
    }
}

fn make_sse_stream(
    mut rx: mpsc::Receiver<GenerationEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(Event::default().event(event.kind.as_str()).data(event.body_json()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ny_domain::message::Verdict;

    #[test]
    fn body_accepts_wire_names() {
        let body: GenerateBody = serde_json::from_str(
            r#"{"id":"m1","chat_uid":"c1","prompt":"hi","model":{"id":"hr-agent"}}"#,
        )
        .unwrap();
        let input = body.into_input();
        assert_eq!(input.chat_id, "c1");
        assert_eq!(input.model.as_deref(), Some("hr-agent"));
        assert_eq!(input.user_id, "anonymous");
        assert!(!input.is_resume());
    }

    #[test]
    fn body_accepts_aliases() {
        let body: GenerateBody = serde_json::from_str(
            r#"{"id":"m1","chat_id":"c1","decisions":[{"interrupt_id":"i1","verdict":"reject","comment":"no"}]}"#,
        )
        .unwrap();
        let input = body.into_input();
        assert_eq!(input.chat_id, "c1");
        assert!(input.is_resume());
        assert_eq!(input.decisions[0].verdict, Verdict::Reject);
    }

    #[test]
    fn misspelt_decisions_field_signals_resume() {
        let body: GenerateBody = serde_json::from_str(
            r#"{"id":"m1","chat_uid":"c1","descisions":[{"interrupt_id":"i1","verdict":"approve"}]}"#,
        )
        .unwrap();
        assert!(body.into_input().is_resume());
    }

    #[test]
    fn path_like_ids_are_rejected() {
        assert!(check_id("id", "m1").is_ok());
        assert!(check_id("id", "").is_err());
        assert!(check_id("id", "a/b").is_err());
        assert!(check_id("chat_uid", "..").is_err());
    }
}
