use std::sync::Arc;

use ny_checkpoint::CheckpointStore;
use ny_domain::config::Config;
use ny_messages::MessageStore;
use ny_providers::{ContextCache, ProviderRegistry};

use crate::runtime::chat_lock::ChatLockMap;
use crate::runtime::interrupt::InterruptController;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services**: config, model registry
/// - **Persistence**: messages, checkpoints
/// - **Runtime**: per-chat locks, interrupt admission, context cache
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub providers: Arc<ProviderRegistry>,

    // ── Persistence ───────────────────────────────────────────────────
    pub messages: MessageStore,
    pub checkpoints: CheckpointStore,

    // ── Runtime ───────────────────────────────────────────────────────
    pub chat_locks: Arc<ChatLockMap>,
    pub interrupts: InterruptController,
    pub contexts: ContextCache,
}
