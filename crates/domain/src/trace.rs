use serde::Serialize;

/// Structured trace events emitted across all noney crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    CheckpointWritten {
        thread_id: String,
        namespace: String,
        checkpoint_id: String,
        parent_id: Option<String>,
        blobs: usize,
    },
    CheckpointLoaded {
        thread_id: String,
        namespace: String,
        checkpoint_id: String,
        channels: usize,
        pending_writes: usize,
        missing_channels: usize,
    },
    WritesStored {
        thread_id: String,
        checkpoint_id: String,
        task_id: String,
        stored: usize,
        skipped: usize,
    },
    ThreadDeleted {
        thread_id: String,
        documents: usize,
    },
    MessagePersisted {
        chat_id: String,
        message_id: String,
        segments: usize,
        interrupted: bool,
        failed: bool,
    },
    InterruptRaised {
        chat_id: String,
        message_id: String,
        interrupt_ids: Vec<String>,
    },
    ResumeAccepted {
        chat_id: String,
        message_id: String,
        decisions: usize,
    },
    LlmRequest {
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    ContextCacheEvicted {
        model: String,
        chat_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ny_event");
    }
}
