//! Folding generation events into a [`Message`].
//!
//! One reducer serves one request. It mutates its message in memory only;
//! the store sees the message once, when the stream ends.
//!
//! A continuing message keeps its interrupt until the engine reports the
//! review settled (a `resumed` step) or finishes. A resume that fails
//! earlier leaves the message paused, so the same decisions can be sent
//! again.

use chrono::Utc;
use futures_util::StreamExt;
use ny_domain::error::{Error, Result};
use ny_domain::event::{steps, EventKind, GenerationEvent};
use ny_domain::message::{AnswerSegment, Message};
use ny_domain::stream::BoxStream;
use ny_domain::trace::TraceEvent;
use serde_json::Value;

use crate::store::MessageStore;

/// Event kinds whose data accumulates into the segment at their index.
const APPENDING_KINDS: &[&str] = &["text", "generated_images"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducerState {
    /// The message was created for this request.
    New,
    /// An interrupted message is being re-entered.
    Continuing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Finished,
    Interrupted,
    Failed,
}

pub struct MessageReducer {
    message: Message,
    state: ReducerState,
    interrupted: bool,
    failed: bool,
}

impl MessageReducer {
    pub fn fresh(message: Message) -> Self {
        Self { message, state: ReducerState::New, interrupted: false, failed: false }
    }

    pub fn continuing(message: Message) -> Self {
        Self { message, state: ReducerState::Continuing, interrupted: false, failed: false }
    }

    pub fn state(&self) -> ReducerState {
        self.state
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn outcome(&self) -> Outcome {
        if self.interrupted {
            Outcome::Interrupted
        } else if self.failed {
            Outcome::Failed
        } else {
            Outcome::Finished
        }
    }

    /// Fold one event into the message.
    pub fn apply(&mut self, event: &GenerationEvent) -> Result<()> {
        let data = &event.body.data;
        match &event.kind {
            EventKind::Text => self.append_at(event),
            EventKind::Other(kind) if APPENDING_KINDS.contains(&kind.as_str()) => self.append_at(event),
            EventKind::Step => {
                if self.state == ReducerState::Continuing && reports_resumed(data) {
                    self.message.interrupt = None;
                }
                extend(&mut self.message.steps, data);
                Ok(())
            }
            EventKind::Source => {
                extend(&mut self.message.sources, data);
                Ok(())
            }
            EventKind::Duration => {
                let seconds = data
                    .get("seconds")
                    .unwrap_or(data)
                    .as_f64()
                    .ok_or_else(|| Error::Integrity(format!("duration event without numeric seconds: {data}")))?;
                self.message.duration = Some(seconds);
                Ok(())
            }
            EventKind::File => {
                self.message.answer_files.push(data.clone());
                Ok(())
            }
            EventKind::Interrupt => {
                self.message.interrupt = Some(data.clone());
                self.interrupted = true;
                Ok(())
            }
            EventKind::Error => {
                self.failed = true;
                Ok(())
            }
            EventKind::Other(_) => self.overwrite_at(event),
        }
    }

    fn index_of(&self, event: &GenerationEvent) -> Result<usize> {
        let index = event
            .body
            .index
            .ok_or_else(|| Error::Integrity(format!("'{}' event without index", event.kind)))?;
        let len = self.message.answer.len();
        if index > len {
            return Err(Error::Integrity(format!(
                "'{}' event index {index} is past the end of the answer (len {len})",
                event.kind
            )));
        }
        Ok(index)
    }

    fn segment(event: &GenerationEvent) -> AnswerSegment {
        AnswerSegment {
            id: event.body.id.clone(),
            kind: event.kind.as_str().to_owned(),
            data: event.body.data.clone(),
        }
    }

    /// `index == len` opens a segment; `index < len` extends that segment.
    fn append_at(&mut self, event: &GenerationEvent) -> Result<()> {
        let index = self.index_of(event)?;
        if index == self.message.answer.len() {
            self.message.answer.push(Self::segment(event));
            return Ok(());
        }
        let existing = &mut self.message.answer[index];
        if existing.kind != event.kind.as_str() {
            return Err(Error::Integrity(format!(
                "segment {index} is '{}', cannot append '{}'",
                existing.kind, event.kind
            )));
        }
        if existing.data.is_null() {
            existing.data = event.body.data.clone();
            return Ok(());
        }
        match (&mut existing.data, &event.body.data) {
            (_, Value::Null) => {}
            (Value::String(acc), Value::String(more)) => acc.push_str(more),
            (Value::Array(acc), Value::Array(more)) => acc.extend(more.iter().cloned()),
            (acc, more) => {
                return Err(Error::Integrity(format!(
                    "cannot append {more} to segment {index} holding {acc}"
                )))
            }
        }
        Ok(())
    }

    /// Catch-all kinds replace whatever sits at their index.
    fn overwrite_at(&mut self, event: &GenerationEvent) -> Result<()> {
        let index = self.index_of(event)?;
        let segment = Self::segment(event);
        if index == self.message.answer.len() {
            self.message.answer.push(segment);
        } else {
            self.message.answer[index] = segment;
        }
        Ok(())
    }

    /// Persist the message. Consumes the reducer, so it happens once.
    pub async fn persist(mut self, store: &MessageStore) -> Result<Message> {
        if self.state == ReducerState::Continuing && self.outcome() == Outcome::Finished {
            self.message.interrupt = None;
        }
        self.message.updated_at = Utc::now();
        store.save(&self.message).await?;
        TraceEvent::MessagePersisted {
            chat_id: self.message.chat_id.clone(),
            message_id: self.message.id.clone(),
            segments: self.message.answer.len(),
            interrupted: self.interrupted,
            failed: self.failed,
        }
        .emit();
        Ok(self.message)
    }
}

fn reports_resumed(data: &Value) -> bool {
    let is_resumed = |item: &Value| item.get("type").and_then(Value::as_str) == Some(steps::RESUMED);
    match data {
        Value::Array(items) => items.iter().any(is_resumed),
        item => is_resumed(item),
    }
}

fn extend(list: &mut Vec<Value>, data: &Value) {
    match data {
        Value::Array(items) => list.extend(items.iter().cloned()),
        Value::Null => {}
        item => list.push(item.clone()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run `events` through `reducer`, forwarding each event unchanged.
///
/// The engine stream is dropped right after an `interrupt`, or after an
/// event the reducer rejects (that event is still forwarded). Whatever
/// ends the stream the message is persisted exactly once; on failure a
/// final `error` event follows so the client always sees an explicit end.
pub fn reduce_stream(
    mut reducer: MessageReducer,
    events: BoxStream<'static, Result<GenerationEvent>>,
    store: MessageStore,
) -> BoxStream<'static, GenerationEvent> {
    let stream = async_stream::stream! {
        let mut events = events;
        let mut failure: Option<Error> = None;

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            if let Err(e) = reducer.apply(&event) {
                failure = Some(e);
                yield event;
                break;
            }
            let stop = event.is_interrupt();
            yield event;
            if stop {
                break;
            }
        }
        drop(events);

        let chat_id = reducer.message().chat_id.clone();
        let message_id = reducer.message().id.clone();
        let persisted = reducer.persist(&store).await;

        match (failure, persisted) {
            (None, Ok(_)) => {}
            (None, Err(e)) => {
                tracing::error!(chat_id = %chat_id, message_id = %message_id, error = %e, "failed to persist message");
                yield GenerationEvent::error(e.to_string());
            }
            (Some(e), persisted) => {
                if let Err(pe) = persisted {
                    tracing::warn!(chat_id = %chat_id, message_id = %message_id, error = %pe, "best-effort flush failed");
                }
                tracing::error!(chat_id = %chat_id, message_id = %message_id, error = %e, "generation failed");
                yield GenerationEvent::error(e.to_string());
            }
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reducer() -> MessageReducer {
        MessageReducer::fresh(Message::new("m1", "T1", "hi"))
    }

    #[test]
    fn text_appends_and_concatenates_by_index() {
        let mut r = reducer();
        r.apply(&GenerationEvent::text("Hel", 0)).unwrap();
        r.apply(&GenerationEvent::text("lo", 0)).unwrap();
        r.apply(&GenerationEvent::text(" world", 1)).unwrap();

        let answer = &r.message().answer;
        assert_eq!(answer.len(), 2);
        assert_eq!(answer[0].kind, "text");
        assert_eq!(answer[0].data, json!("Hello"));
        assert_eq!(answer[1].data, json!(" world"));
    }

    #[test]
    fn text_past_the_end_is_rejected() {
        let mut r = reducer();
        let err = r.apply(&GenerationEvent::text("x", 1)).unwrap_err();
        assert!(err.is_integrity());
        assert!(r.message().answer.is_empty());
    }

    #[test]
    fn text_without_index_is_rejected() {
        let mut r = reducer();
        let mut ev = GenerationEvent::text("x", 0);
        ev.body.index = None;
        assert!(r.apply(&ev).unwrap_err().is_integrity());
    }

    #[test]
    fn steps_and_sources_append_in_arrival_order() {
        let mut r = reducer();
        r.apply(&GenerationEvent::step(vec![json!("a"), json!("b")])).unwrap();
        r.apply(&GenerationEvent::new(EventKind::Step, json!({"type": "tool_call"}))).unwrap();
        r.apply(&GenerationEvent::source(vec![json!({"url": "x"})])).unwrap();
        assert_eq!(r.message().steps, vec![json!("a"), json!("b"), json!({"type": "tool_call"})]);
        assert_eq!(r.message().sources.len(), 1);
    }

    #[test]
    fn duration_is_last_write_wins() {
        let mut r = reducer();
        r.apply(&GenerationEvent::duration(1.0)).unwrap();
        r.apply(&GenerationEvent::duration(1.2)).unwrap();
        assert_eq!(r.message().duration, Some(1.2));
    }

    #[test]
    fn file_goes_to_answer_files() {
        let mut r = reducer();
        r.apply(&GenerationEvent::file(json!({"name": "export.csv"}))).unwrap();
        assert_eq!(r.message().answer_files, vec![json!({"name": "export.csv"})]);
        assert!(r.message().answer.is_empty());
    }

    #[test]
    fn interrupt_sets_payload_and_outcome() {
        let mut r = reducer();
        r.apply(&GenerationEvent::interrupt(json!({"requests": []}))).unwrap();
        assert_eq!(r.outcome(), Outcome::Interrupted);
        assert_eq!(r.message().interrupt, Some(json!({"requests": []})));
    }

    #[test]
    fn unknown_kind_overwrites_at_index() {
        let mut r = reducer();
        let chart = |v| GenerationEvent::new(EventKind::Other("chart".into()), v).with_index(0);
        r.apply(&chart(json!({"v": 1}))).unwrap();
        r.apply(&chart(json!({"v": 2}))).unwrap();
        assert_eq!(r.message().answer.len(), 1);
        assert_eq!(r.message().answer[0].kind, "chart");
        assert_eq!(r.message().answer[0].data, json!({"v": 2}));
    }

    #[test]
    fn generated_images_extend_their_segment() {
        let mut r = reducer();
        let images = |v| GenerationEvent::new(EventKind::Other("generated_images".into()), v).with_index(0);
        r.apply(&images(json!(["a.png"]))).unwrap();
        r.apply(&images(json!(["b.png"]))).unwrap();
        assert_eq!(r.message().answer[0].data, json!(["a.png", "b.png"]));
    }

    #[test]
    fn appending_text_onto_other_kind_is_rejected() {
        let mut r = reducer();
        r.apply(&GenerationEvent::new(EventKind::Other("chart".into()), json!({})).with_index(0))
            .unwrap();
        assert!(r.apply(&GenerationEvent::text("x", 0)).unwrap_err().is_integrity());
    }

    #[test]
    fn error_event_marks_failure_without_mutation() {
        let mut r = reducer();
        r.apply(&GenerationEvent::error("model unavailable")).unwrap();
        assert_eq!(r.outcome(), Outcome::Failed);
        assert!(r.message().answer.is_empty());
        assert!(r.message().steps.is_empty());
    }
}
