//! AppState construction extracted from `main.rs`.
//!
//! `build_app_state` is the boot path used by `serve`. Tests use
//! [`Stores`] directly so they can register scripted models before the
//! state is assembled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use ny_checkpoint::CheckpointStore;
use ny_domain::config::{Config, ConfigSeverity, StoreBackend, StoreConfig};
use ny_messages::MessageStore;
use ny_providers::{ContextCache, EngineDeps, ProviderRegistry, ToolRegistry};
use ny_store::{DocumentStore, FileDocumentStore, MemoryDocumentStore, TimeoutStore};

use crate::runtime::chat_lock::ChatLockMap;
use crate::runtime::interrupt::InterruptController;
use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Document store ───────────────────────────────────────────────
    let docs = open_document_store(&config.store).context("opening document store")?;
    let stores = Stores::new(&config, docs);

    // ── Tools & models ───────────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::from_config(&config.tools));
    tracing::info!(count = tools.len(), "tool registry ready");

    let providers = ProviderRegistry::from_config(&config.llm, &stores.engine_deps(tools));
    tracing::info!(
        count = providers.len(),
        default = %providers.default_model(),
        "model registry ready"
    );

    Ok(stores.into_state(config, providers))
}

/// Open the configured backend behind a per-call timeout.
pub fn open_document_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let limit = Duration::from_millis(config.op_timeout_ms);
    let docs: Arc<dyn DocumentStore> = match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("memory store backend: nothing survives a restart");
            Arc::new(TimeoutStore::new(MemoryDocumentStore::new(), limit))
        }
        StoreBackend::File => {
            let files = FileDocumentStore::open(&config.path)
                .with_context(|| format!("store path {}", config.path.display()))?;
            tracing::info!(path = %config.path.display(), "file store backend ready");
            Arc::new(TimeoutStore::new(files, limit))
        }
    };
    Ok(docs)
}

/// The persistence layer shared by engines and handlers.
#[derive(Clone)]
pub struct Stores {
    pub messages: MessageStore,
    pub checkpoints: CheckpointStore,
    pub contexts: ContextCache,
}

impl Stores {
    pub fn new(config: &Config, docs: Arc<dyn DocumentStore>) -> Self {
        let messages = MessageStore::new(docs.clone());
        Self {
            checkpoints: CheckpointStore::new(docs, &config.checkpoint),
            contexts: ContextCache::new(config.llm.context_cache_capacity, messages.clone()),
            messages,
        }
    }

    pub fn engine_deps(&self, tools: Arc<ToolRegistry>) -> EngineDeps {
        EngineDeps {
            tools,
            contexts: self.contexts.clone(),
            checkpoints: self.checkpoints.clone(),
        }
    }

    pub fn into_state(self, config: Arc<Config>, providers: ProviderRegistry) -> AppState {
        AppState {
            config,
            providers: Arc::new(providers),
            interrupts: InterruptController::new(self.messages.clone()),
            messages: self.messages,
            checkpoints: self.checkpoints,
            chat_locks: Arc::new(ChatLockMap::new()),
            contexts: self.contexts,
        }
    }
}
