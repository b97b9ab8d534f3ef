//! Admission of generation requests: fresh prompt or resume.
//!
//! A request carrying decisions re-enters the interrupted message it
//! names; anything else starts a new message. The engine restores its own
//! execution state from checkpoints, so admission only deals with the
//! message record and the interrupt stored on it.

use std::sync::Arc;

use ny_domain::error::{Error, Result};
use ny_domain::message::{Decision, InterruptPayload, Message};
use ny_domain::trace::TraceEvent;
use ny_messages::{MessageReducer, MessageStore};
use ny_providers::{GenerationProvider, GenerationRequest, ProviderRegistry};

/// Identity and content of one `/v1/generate` call.
#[derive(Debug, Clone, Default)]
pub struct GenerateInput {
    pub message_id: String,
    pub chat_id: String,
    pub user_id: String,
    pub prompt: String,
    /// Requested model id; unknown or absent means the default.
    pub model: Option<String>,
    pub decisions: Vec<Decision>,
}

impl GenerateInput {
    pub fn is_resume(&self) -> bool {
        !self.decisions.is_empty()
    }
}

/// An admitted request: the engine to drive, the request to drive it with
/// and the reducer that will own the message.
pub struct Admission {
    pub provider: Arc<dyn GenerationProvider>,
    pub reducer: MessageReducer,
    pub request: GenerationRequest,
}

#[derive(Clone)]
pub struct InterruptController {
    messages: MessageStore,
}

impl InterruptController {
    pub fn new(messages: MessageStore) -> Self {
        Self { messages }
    }

    pub async fn admit(&self, input: GenerateInput, models: &ProviderRegistry) -> Result<Admission> {
        if input.is_resume() {
            self.resume(input, models).await
        } else {
            self.fresh(input, models).await
        }
    }

    async fn fresh(&self, input: GenerateInput, models: &ProviderRegistry) -> Result<Admission> {
        if input.prompt.trim().is_empty() {
            return Err(Error::InvalidRequest("prompt must not be empty".into()));
        }
        let provider = models.resolve(input.model.as_deref())?;
        if let Some(existing) = self.messages.get(&input.chat_id, &input.message_id).await? {
            if existing.pending_interrupt()?.is_some() {
                return Err(Error::Integrity(format!(
                    "message {} is awaiting review; resume it with decisions",
                    input.message_id
                )));
            }
            tracing::info!(
                chat_id = %input.chat_id,
                message_id = %input.message_id,
                "regenerating existing message"
            );
        }

        let mut message = Message::new(&input.message_id, &input.chat_id, &input.prompt);
        message.model = Some(provider.model_id().to_owned());

        let request = GenerationRequest {
            message_id: input.message_id,
            chat_id: input.chat_id,
            user_id: input.user_id,
            prompt: input.prompt,
            ..Default::default()
        };
        Ok(Admission { provider, reducer: MessageReducer::fresh(message), request })
    }

    async fn resume(&self, input: GenerateInput, models: &ProviderRegistry) -> Result<Admission> {
        let Some(message) = self.messages.get(&input.chat_id, &input.message_id).await? else {
            return Err(Error::InvalidRequest(format!(
                "no message {} in chat {} to resume",
                input.message_id, input.chat_id
            )));
        };
        let payload: InterruptPayload = message.pending_interrupt()?.ok_or_else(|| {
            Error::Integrity(format!(
                "message {} has no outstanding interrupt",
                input.message_id
            ))
        })?;
        payload.validate(&input.decisions)?;
        // The model that paused owns the checkpoint thread.
        let provider = models.resolve(message.model.as_deref().or(input.model.as_deref()))?;

        TraceEvent::ResumeAccepted {
            chat_id: input.chat_id.clone(),
            message_id: input.message_id.clone(),
            decisions: input.decisions.len(),
        }
        .emit();

        // The reducer clears the interrupt once the engine reports the review
        // settled; a resume that fails before that can be retried.
        let request = GenerationRequest {
            message_id: input.message_id,
            chat_id: input.chat_id,
            user_id: input.user_id,
            prompt: message.prompt.clone(),
            decisions: input.decisions,
            pending_interrupt: Some(payload),
            segment_offset: message.answer.len(),
        };
        Ok(Admission { provider, reducer: MessageReducer::continuing(message), request })
    }
}

#[cfg(test)]
mod tests {
    use ny_domain::config::ModelKind;
    use ny_domain::event::GenerationEvent;
    use ny_domain::message::{ActionRequest, Verdict};
    use ny_domain::stream::BoxStream;
    use ny_messages::ReducerState;
    use ny_store::MemoryDocumentStore;
    use serde_json::json;

    use super::*;

    struct Idle(&'static str);

    #[async_trait::async_trait]
    impl GenerationProvider for Idle {
        fn model_id(&self) -> &str {
            self.0
        }
        fn kind(&self) -> ModelKind {
            ModelKind::Agent
        }
        async fn stream(
            &self,
            _req: GenerationRequest,
        ) -> Result<BoxStream<'static, Result<GenerationEvent>>> {
            Ok(Box::pin(futures_util::stream::empty()))
        }
    }

    fn models() -> ProviderRegistry {
        let mut models = ProviderRegistry::new("noney-chat");
        models.register(Arc::new(Idle("noney-chat")));
        models.register(Arc::new(Idle("hr-agent")));
        models
    }

    fn controller() -> (InterruptController, MessageStore) {
        let messages = MessageStore::new(Arc::new(MemoryDocumentStore::new()));
        (InterruptController::new(messages.clone()), messages)
    }

    fn input(prompt: &str) -> GenerateInput {
        GenerateInput {
            message_id: "m1".into(),
            chat_id: "c1".into(),
            user_id: "u1".into(),
            prompt: prompt.into(),
            model: None,
            decisions: Vec::new(),
        }
    }

    fn approve(id: &str) -> Decision {
        Decision { interrupt_id: id.into(), verdict: Verdict::Approve, comment: None }
    }

    fn paused_message() -> Message {
        let mut m = Message::new("m1", "c1", "export the roster");
        m.model = Some("hr-agent".into());
        m.answer.push(ny_domain::message::AnswerSegment {
            id: None,
            kind: "text".into(),
            data: json!("Preparing the export."),
        });
        m.interrupt = Some(
            InterruptPayload {
                requests: vec![ActionRequest {
                    interrupt_id: "i1".into(),
                    call_id: "call_1".into(),
                    action: "generate_csv".into(),
                    args: json!({}),
                    description: String::new(),
                }],
            }
            .to_value()
            .unwrap(),
        );
        m
    }

    #[tokio::test]
    async fn fresh_request_starts_new_message() {
        let (ctl, _) = controller();
        let admission = ctl.admit(input("hi"), &models()).await.unwrap();
        assert_eq!(admission.reducer.state(), ReducerState::New);
        assert_eq!(admission.reducer.message().model.as_deref(), Some("noney-chat"));
        assert_eq!(admission.provider.model_id(), "noney-chat");
        assert!(!admission.request.is_resume());
        assert_eq!(admission.request.segment_offset, 0);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let (ctl, _) = controller();
        let err = ctl.admit(input("  "), &models()).await.err().unwrap();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn fresh_prompt_cannot_overwrite_paused_message() {
        let (ctl, messages) = controller();
        messages.save(&paused_message()).await.unwrap();
        let err = ctl.admit(input("again"), &models()).await.err().unwrap();
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn resume_continues_after_existing_segments() {
        let (ctl, messages) = controller();
        messages.save(&paused_message()).await.unwrap();

        let mut req = input("");
        req.decisions.push(approve("i1"));
        let admission = ctl.admit(req, &models()).await.unwrap();

        assert_eq!(admission.reducer.state(), ReducerState::Continuing);
        assert_eq!(admission.provider.model_id(), "hr-agent");
        assert!(admission.reducer.message().interrupt.is_some());
        assert_eq!(admission.request.segment_offset, 1);
        assert_eq!(admission.request.prompt, "export the roster");
        assert!(admission.request.pending_interrupt.is_some());
    }

    #[tokio::test]
    async fn resume_without_interrupt_is_integrity_violation() {
        let (ctl, messages) = controller();
        messages.save(&Message::new("m1", "c1", "hi")).await.unwrap();
        let mut req = input("");
        req.decisions.push(approve("i1"));
        assert!(ctl.admit(req, &models()).await.err().unwrap().is_integrity());
    }

    #[tokio::test]
    async fn resume_with_unknown_interrupt_id_is_integrity_violation() {
        let (ctl, messages) = controller();
        messages.save(&paused_message()).await.unwrap();
        let mut req = input("");
        req.decisions.push(approve("i9"));
        assert!(ctl.admit(req, &models()).await.err().unwrap().is_integrity());
    }

    #[tokio::test]
    async fn resume_of_missing_message_is_invalid() {
        let (ctl, _) = controller();
        let mut req = input("");
        req.decisions.push(approve("i1"));
        let err = ctl.admit(req, &models()).await.err().unwrap();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
