//! Driving one generation request end to end.
//!
//! The engine stream is folded by the message reducer on a spawned task
//! that outlives the HTTP response: a client that disconnects mid-stream
//! does not cut the reduction short, so the message and checkpoints are
//! always persisted. Events reach the response through a bounded channel.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::Instrument;

use ny_domain::error::Error;
use ny_domain::event::GenerationEvent;
use ny_messages::reduce_stream;

use crate::runtime::chat_lock::ChatBusy;
use crate::runtime::interrupt::GenerateInput;
use crate::state::AppState;

/// Why a generation could not start. Nothing has been streamed yet, so
/// the caller can still answer with a plain HTTP status.
#[derive(Debug)]
pub enum StartError {
    Busy(ChatBusy),
    Rejected(Error),
}

impl From<ChatBusy> for StartError {
    fn from(e: ChatBusy) -> Self {
        StartError::Busy(e)
    }
}

impl From<Error> for StartError {
    fn from(e: Error) -> Self {
        StartError::Rejected(e)
    }
}

/// Admit `input`, start its engine and return the forwarded event stream.
///
/// The chat lock is held by the driver task until the message has been
/// persisted.
pub async fn start_generation(
    state: &AppState,
    input: GenerateInput,
) -> Result<mpsc::Receiver<GenerationEvent>, StartError> {
    let permit = state.chat_locks.try_acquire(&input.chat_id)?;

    let chat_id = input.chat_id.clone();
    let message_id = input.message_id.clone();
    let resume = input.is_resume();

    let admission = state.interrupts.admit(input, &state.providers).await?;
    let model = admission.provider.model_id().to_owned();
    let events = admission.provider.stream(admission.request).await?;
    let mut reduced = reduce_stream(admission.reducer, events, state.messages.clone());

    let (tx, rx) = mpsc::channel::<GenerationEvent>(64);
    let span = tracing::info_span!(
        "request",
        chat_id = %chat_id,
        message_id = %message_id,
        model = %model,
        resume,
        "otel.kind" = "SERVER",
    );
    tokio::spawn(
        async move {
            let _permit = permit;
            let mut forwarded = 0usize;
            let mut client_gone = false;
            while let Some(event) = reduced.next().await {
                if client_gone {
                    continue;
                }
                if tx.send(event).await.is_err() {
                    client_gone = true;
                    tracing::info!(forwarded, "client disconnected; finishing generation");
                } else {
                    forwarded += 1;
                }
            }
            tracing::debug!(forwarded, "generation finished");
        }
        .instrument(span),
    );

    Ok(rx)
}
