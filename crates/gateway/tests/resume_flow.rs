//! `/v1/generate` end to end: router, admission, engine, reducer and
//! stores, with a scripted upstream model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

use ny_domain::config::{Config, ModelConfig, ModelKind};
use ny_domain::error::{Error, Result};
use ny_domain::event::{EventKind, GenerationEvent};
use ny_domain::message::{InterruptPayload, Message};
use ny_domain::stream::{BoxStream, ModelEvent};
use ny_domain::tool::ToolDefinition;
use ny_gateway::api;
use ny_gateway::bootstrap::Stores;
use ny_gateway::runtime::generate::start_generation;
use ny_gateway::runtime::interrupt::GenerateInput;
use ny_gateway::state::AppState;
use ny_providers::{build_provider, ChatModel, ChatRequest, ChatResponse, ProviderRegistry, Tool, ToolRegistry};
use ny_store::{CollectionPath, DocPath, Document, DocumentStore, MemoryDocumentStore, Query};

// ── scripted upstream ──────────────────────────────────────────────

#[derive(Default)]
struct ScriptedModel {
    rounds: Mutex<VecDeque<Vec<ModelEvent>>>,
}

impl ScriptedModel {
    fn push(&self, round: Vec<ModelEvent>) {
        self.rounds.lock().push_back(round);
    }
}

#[async_trait::async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
        Err(Error::Other("not scripted".into()))
    }

    async fn chat_stream(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        let round = self
            .rounds
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Other("script exhausted".into()))?;
        Ok(Box::pin(futures_util::stream::iter(round.into_iter().map(Ok))))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn token(t: &str) -> ModelEvent {
    ModelEvent::Token { text: t.into() }
}

fn export_call() -> ModelEvent {
    ModelEvent::ToolCallFinished {
        call_id: "call_1".into(),
        tool_name: "generate_csv".into(),
        arguments: json!({ "department": "sales" }),
    }
}

fn done() -> ModelEvent {
    ModelEvent::Done { usage: None, finish_reason: Some("stop".into()) }
}

struct ExportTool {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Tool for ExportTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "generate_csv".into(),
            description: "Export employees as CSV".into(),
            parameters: json!({ "type": "object" }),
        }
    }

    async fn call(&self, _arguments: &Value) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("https://files.example/export.csv".into())
    }
}

// ── store with switchable checkpoint outage ────────────────────────

/// Memory store whose checkpoint reads time out while `outage` is set.
#[derive(Default)]
struct FlakyDocs {
    inner: MemoryDocumentStore,
    outage: AtomicBool,
}

impl FlakyDocs {
    fn check(&self, segments: &[String]) -> Result<()> {
        if self.outage.load(Ordering::SeqCst) && segments.first().map(String::as_str) == Some("checkpoints") {
            return Err(Error::Timeout(format!("read {} timed out", segments.join("/"))));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for FlakyDocs {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        self.check(path.segments())?;
        self.inner.get(path).await
    }

    async fn set(&self, path: &DocPath, doc: Document) -> Result<()> {
        self.inner.set(path, doc).await
    }

    async fn create(&self, path: &DocPath, doc: Document) -> Result<bool> {
        self.inner.create(path, doc).await
    }

    async fn delete(&self, path: &DocPath) -> Result<bool> {
        self.inner.delete(path).await
    }

    async fn list(&self, collection: &CollectionPath, query: &Query) -> Result<Vec<(String, Document)>> {
        self.check(collection.segments())?;
        self.inner.list(collection, query).await
    }

    async fn document_ids(&self, collection: &CollectionPath) -> Result<Vec<String>> {
        self.check(collection.segments())?;
        self.inner.document_ids(collection).await
    }

    async fn subcollections(&self, path: &DocPath) -> Result<Vec<String>> {
        self.inner.subcollections(path).await
    }
}

// ── fixture ────────────────────────────────────────────────────────

fn model_config(id: &str, kind: ModelKind) -> ModelConfig {
    ModelConfig {
        id: id.into(),
        kind,
        base_url: "http://unused".into(),
        api_key_env: None,
        upstream_model: "scripted".into(),
        system_prompt: None,
        temperature: None,
        max_tokens: None,
        history_limit: 10,
        max_steps: 4,
        tools: vec!["generate_csv".into()],
        approval_required: vec!["generate_csv".into()],
    }
}

struct Harness {
    router: Router,
    state: AppState,
    model: Arc<ScriptedModel>,
    export: Arc<ExportTool>,
    docs: Arc<FlakyDocs>,
}

impl Harness {
    fn new() -> Self {
        let mut config = Config::default();
        config.llm.default_model = "hr-agent".into();

        let docs = Arc::new(FlakyDocs::default());
        let stores = Stores::new(&config, docs.clone());

        let export = Arc::new(ExportTool { calls: AtomicUsize::new(0) });
        let mut tools = ToolRegistry::new();
        tools.register(export.clone());
        let deps = stores.engine_deps(Arc::new(tools));

        let model = Arc::new(ScriptedModel::default());
        let mut providers = ProviderRegistry::new("hr-agent");
        providers.register(build_provider(model_config("hr-agent", ModelKind::Agent), model.clone(), &deps));
        providers.register(build_provider(model_config("noney-chat", ModelKind::Chat), model.clone(), &deps));

        let state = stores.into_state(Arc::new(config), providers);
        let router = api::router().with_state(state.clone());
        Self { router, state, model, export, docs }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn generate(&self, body: Value) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri("/v1/generate")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(req).await
    }

    async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = self.send(req).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn message(&self, chat: &str, id: &str) -> Message {
        let (status, body) = self.get_json(&format!("/v1/chats/{chat}/messages/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_value(body).unwrap()
    }
}

fn sse_events(body: &[u8]) -> Vec<GenerationEvent> {
    String::from_utf8_lossy(body)
        .split("\n\n")
        .filter(|frame| frame.contains("event:"))
        .map(|frame| GenerationEvent::from_sse_frame(frame).unwrap())
        .collect()
}

fn error_of(body: &[u8]) -> String {
    let v: Value = serde_json::from_slice(body).unwrap();
    v["error"].as_str().unwrap_or_default().to_owned()
}

async fn pause(h: &Harness) -> InterruptPayload {
    h.model.push(vec![token("Preparing the export."), export_call(), done()]);
    let (status, body) = h
        .generate(json!({ "id": "m1", "chat_uid": "T1", "prompt": "export sales staff" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let events = sse_events(&body);
    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Interrupt);
    serde_json::from_value(last.body.data.clone()).unwrap()
}

// ── tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_answer_is_streamed_and_persisted() {
    let h = Harness::new();
    h.model.push(vec![token("Hel"), token("lo"), done()]);

    let (status, body) = h
        .generate(json!({ "id": "m1", "chat_uid": "C1", "prompt": "hi", "model": { "id": "noney-chat" } }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let events = sse_events(&body);
    assert_eq!(events.last().unwrap().kind, EventKind::Duration);

    let message = h.message("C1", "m1").await;
    assert_eq!(message.answer_text(), "Hello");
    assert_eq!(message.model.as_deref(), Some("noney-chat"));
    assert!(message.duration.is_some());
    assert!(message.interrupt.is_none());
}

#[tokio::test]
async fn interrupt_then_approve_continues_same_message() {
    let h = Harness::new();
    let payload = pause(&h).await;

    let paused = h.message("T1", "m1").await;
    assert_eq!(paused.answer.len(), 1);
    assert!(paused.duration.is_none());
    assert_eq!(paused.pending_interrupt().unwrap(), Some(payload.clone()));
    assert_eq!(h.export.calls.load(Ordering::SeqCst), 0);

    h.model.push(vec![token("Your export is ready."), done()]);
    let (status, body) = h
        .generate(json!({
            "id": "m1",
            "chat_uid": "T1",
            "descisions": [{ "interrupt_id": payload.requests[0].interrupt_id, "verdict": "approve" }],
        }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let events = sse_events(&body);
    assert_eq!(events.last().unwrap().kind, EventKind::Duration);
    assert!(events
        .iter()
        .filter(|e| e.kind == EventKind::Text)
        .all(|e| e.body.index == Some(1)));

    let resumed = h.message("T1", "m1").await;
    assert_eq!(h.export.calls.load(Ordering::SeqCst), 1);
    assert!(resumed.interrupt.is_none());
    assert_eq!(resumed.answer.len(), 2);
    assert_eq!(resumed.answer_text(), "Preparing the export.Your export is ready.");
    assert_eq!(resumed.prompt, "export sales staff");
    assert_eq!(resumed.created_at, paused.created_at);

    let (status, history) = h.get_json("/v1/chats/T1/messages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["count"], json!(1));

    let (status, checkpoints) = h.get_json("/v1/chats/T1/checkpoints?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let list = checkpoints["checkpoints"].as_array().unwrap();
    assert!(list.len() >= 3);
    let ids: Vec<&str> = list.iter().map(|c| c["checkpoint_id"].as_str().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] > w[1]), "newest first");
}

#[tokio::test]
async fn resume_hit_by_store_timeout_can_be_retried() {
    let h = Harness::new();
    let payload = pause(&h).await;
    let resume = json!({
        "id": "m1",
        "chat_uid": "T1",
        "descisions": [{ "interrupt_id": payload.requests[0].interrupt_id, "verdict": "approve" }],
    });

    h.docs.outage.store(true, Ordering::SeqCst);
    let (status, body) = h.generate(resume.clone()).await;
    h.docs.outage.store(false, Ordering::SeqCst);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sse_events(&body).last().unwrap().kind, EventKind::Error);

    let still_paused = h.message("T1", "m1").await;
    assert_eq!(still_paused.pending_interrupt().unwrap(), Some(payload.clone()));
    assert_eq!(h.export.calls.load(Ordering::SeqCst), 0);

    h.model.push(vec![token("Your export is ready."), done()]);
    let (status, body) = h.generate(resume).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sse_events(&body).last().unwrap().kind, EventKind::Duration);

    let resumed = h.message("T1", "m1").await;
    assert!(resumed.interrupt.is_none());
    assert_eq!(h.export.calls.load(Ordering::SeqCst), 1);
    assert_eq!(resumed.answer_text(), "Preparing the export.Your export is ready.");
}

#[tokio::test]
async fn reject_is_recorded_without_running_tool() {
    let h = Harness::new();
    let payload = pause(&h).await;

    h.model.push(vec![token("Okay, no export."), done()]);
    let (status, _) = h
        .generate(json!({
            "id": "m1",
            "chat_id": "T1",
            "decisions": [{
                "interrupt_id": payload.requests[0].interrupt_id,
                "verdict": "reject",
                "comment": "needs sign-off",
            }],
        }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.export.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.message("T1", "m1").await.answer_text(), "Preparing the export.Okay, no export.");
}

#[tokio::test]
async fn unknown_interrupt_id_is_refused_before_streaming() {
    let h = Harness::new();
    pause(&h).await;

    let (status, body) = h
        .generate(json!({
            "id": "m1",
            "chat_uid": "T1",
            "descisions": [{ "interrupt_id": "bogus", "verdict": "approve" }],
        }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error_of(&body).contains("integrity violation"));

    // The interrupt is still outstanding.
    assert!(h.message("T1", "m1").await.interrupt.is_some());
}

#[tokio::test]
async fn fresh_prompt_on_paused_message_is_refused() {
    let h = Harness::new();
    pause(&h).await;
    let (status, _) = h
        .generate(json!({ "id": "m1", "chat_uid": "T1", "prompt": "start over" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn resume_of_unknown_message_is_bad_request() {
    let h = Harness::new();
    let (status, _) = h
        .generate(json!({
            "id": "nope",
            "chat_uid": "T1",
            "descisions": [{ "interrupt_id": "i1", "verdict": "approve" }],
        }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn busy_chat_is_conflict() {
    let h = Harness::new();
    let _held = h.state.chat_locks.try_acquire("T1").unwrap();
    let (status, body) = h
        .generate(json!({ "id": "m1", "chat_uid": "T1", "prompt": "hi" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error_of(&body).contains("already running"));
}

#[tokio::test]
async fn invalid_ids_are_bad_request() {
    let h = Harness::new();
    let (status, _) = h
        .generate(json!({ "id": "a/b", "chat_uid": "T1", "prompt": "hi" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_message_is_not_found() {
    let h = Harness::new();
    let (status, body) = h.get_json("/v1/chats/T1/messages/absent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("absent"));
}

#[tokio::test]
async fn engine_failure_still_persists_and_ends_with_error() {
    let h = Harness::new();
    // No scripted round: the upstream call fails mid-request.
    let (status, body) = h
        .generate(json!({ "id": "m1", "chat_uid": "T1", "prompt": "hi" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let events = sse_events(&body);
    assert_eq!(events.last().unwrap().kind, EventKind::Error);
    assert_eq!(h.message("T1", "m1").await.prompt, "hi");
}

#[tokio::test]
async fn delete_chat_removes_messages_and_checkpoints() {
    let h = Harness::new();
    pause(&h).await;

    let req = Request::builder()
        .method("DELETE")
        .uri("/v1/chats/T1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = h.send(req).await;
    assert_eq!(status, StatusCode::OK);
    let summary: Value = serde_json::from_slice(&body).unwrap();
    assert!(summary["deleted"]["checkpoint_documents"].as_u64().unwrap() > 0);

    let (status, _) = h.get_json("/v1/chats/T1/messages/m1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, checkpoints) = h.get_json("/v1/chats/T1/checkpoints").await;
    assert_eq!(checkpoints["count"], json!(0));
}

#[tokio::test]
async fn models_lists_default() {
    let h = Harness::new();
    let (status, body) = h.get_json("/v1/models").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default"], json!("hr-agent"));
    assert_eq!(body["models"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn disconnected_client_does_not_stop_persistence() {
    let h = Harness::new();
    h.model.push(vec![token("Preparing the export."), export_call(), done()]);

    let rx = start_generation(
        &h.state,
        GenerateInput {
            message_id: "m1".into(),
            chat_id: "T1".into(),
            user_id: "u1".into(),
            prompt: "export sales staff".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    drop(rx);

    let mut persisted = None;
    for _ in 0..100 {
        if let Some(m) = h.state.messages.get("T1", "m1").await.unwrap() {
            if m.interrupt.is_some() {
                persisted = Some(m);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let message = persisted.expect("message persisted after disconnect");
    assert_eq!(message.answer_text(), "Preparing the export.");
}
