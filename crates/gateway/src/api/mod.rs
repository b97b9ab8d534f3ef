pub mod chats;
pub mod generate;
pub mod models;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;

use ny_domain::error::Error;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(models::health))
        .route("/v1/models", get(models::list_models))
        // Generation (fresh prompt or resume)
        .route("/v1/generate", post(generate::generate))
        // Chat history
        .route("/v1/chats/:chat_id", delete(chats::delete_chat))
        .route("/v1/chats/:chat_id/messages", get(chats::list_messages))
        .route("/v1/chats/:chat_id/messages/:message_id", get(chats::get_message))
        .route("/v1/chats/:chat_id/checkpoints", get(chats::list_checkpoints))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// HTTP status for a domain error.
pub(crate) fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::Integrity(_) => StatusCode::CONFLICT,
        Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn error_response(err: &Error) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        tracing::error!(error = %err, status = status.as_u16(), "request failed");
    } else {
        tracing::warn!(error = %err, status = status.as_u16(), "request rejected");
    }
    api_error(status, err.to_string())
}
