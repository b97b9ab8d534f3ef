//! Chat history endpoints.
//!
//! - `GET    /v1/chats/:chat_id/messages`            : recent messages, oldest first
//! - `GET    /v1/chats/:chat_id/messages/:message_id`: one message
//! - `GET    /v1/chats/:chat_id/checkpoints`         : checkpoint history, newest first
//! - `DELETE /v1/chats/:chat_id`                     : messages, checkpoints and cached context

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;
use serde::Deserialize;

use ny_checkpoint::{CheckpointQuery, CheckpointView};

use crate::api::{api_error, error_response};
use crate::state::AppState;

fn d_limit() -> usize {
    50
}

const MAX_LIMIT: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default = "d_limit")]
    pub limit: usize,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(q): Query<ListMessagesQuery>,
) -> Response {
    match state.messages.history(&chat_id, q.limit.min(MAX_LIMIT)).await {
        Ok(messages) => Json(serde_json::json!({
            "chat_id": chat_id,
            "count": messages.len(),
            "messages": messages,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn get_message(
    State(state): State<AppState>,
    Path((chat_id, message_id)): Path<(String, String)>,
) -> Response {
    match state.messages.get(&chat_id, &message_id).await {
        Ok(Some(message)) => Json(message).into_response(),
        Ok(None) => api_error(
            StatusCode::NOT_FOUND,
            format!("message {message_id} not found in chat {chat_id}"),
        ),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checkpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListCheckpointsQuery {
    #[serde(default = "d_limit")]
    pub limit: usize,
    /// Only checkpoints older than this id.
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

fn checkpoint_json(view: &CheckpointView) -> serde_json::Value {
    serde_json::json!({
        "checkpoint_id": view.checkpoint_id(),
        "parent_checkpoint_id": view.parent.as_ref().and_then(|p| p.checkpoint_id.clone()),
        "namespace": view.address.namespace,
        "ts": view.checkpoint.ts,
        "metadata": view.metadata,
        "channel_versions": view.checkpoint.channel_versions,
        "pending_writes": view.pending_writes.len(),
        "missing_channels": view.missing_channels,
    })
}

pub async fn list_checkpoints(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(q): Query<ListCheckpointsQuery>,
) -> Response {
    let query = CheckpointQuery {
        thread_id: Some(chat_id.clone()),
        namespace: q.namespace,
        filter: None,
        before: q.before,
        limit: Some(q.limit.min(MAX_LIMIT)),
    };
    let mut stream = match state.checkpoints.list(query) {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };

    let mut items = Vec::new();
    while let Some(view) = stream.next().await {
        match view {
            Ok(view) => items.push(checkpoint_json(&view)),
            Err(e) => return error_response(&e),
        }
    }

    Json(serde_json::json!({
        "chat_id": chat_id,
        "count": items.len(),
        "checkpoints": items,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/chats/:chat_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_chat(State(state): State<AppState>, Path(chat_id): Path<String>) -> Response {
    // Deleting under a running generation would race its final writes.
    let _permit = match state.chat_locks.try_acquire(&chat_id) {
        Ok(p) => p,
        Err(busy) => return api_error(StatusCode::CONFLICT, busy.to_string()),
    };

    let messages = match state.messages.delete_chat(&chat_id).await {
        Ok(n) => n,
        Err(e) => return error_response(&e),
    };
    let checkpoints = match state.checkpoints.delete_thread(&chat_id).await {
        Ok(n) => n,
        Err(e) => return error_response(&e),
    };
    let contexts = state.contexts.forget_chat(&chat_id);

    tracing::info!(chat_id = %chat_id, messages, checkpoints, contexts, "chat deleted");

    Json(serde_json::json!({
        "chat_id": chat_id,
        "deleted": {
            "message_documents": messages,
            "checkpoint_documents": checkpoints,
            "cached_contexts": contexts,
        },
    }))
    .into_response()
}
