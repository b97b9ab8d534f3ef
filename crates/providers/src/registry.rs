//! Provider registry.
//!
//! Holds one [`GenerationProvider`] per configured model id. Requests that
//! name no model, or an unknown one, get the configured default.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ny_checkpoint::CheckpointStore;
use ny_domain::config::{LlmConfig, ModelConfig, ModelKind};
use ny_domain::error::{Error, Result};
use serde::Serialize;

use crate::agent::AgentProvider;
use crate::chat::ChatProvider;
use crate::context::ContextCache;
use crate::openai_compat::OpenAiCompatModel;
use crate::tools::ToolRegistry;
use crate::traits::{ChatModel, GenerationProvider};

/// Shared collaborators every engine is built with.
#[derive(Clone)]
pub struct EngineDeps {
    pub tools: Arc<ToolRegistry>,
    pub contexts: ContextCache,
    pub checkpoints: CheckpointStore,
}

/// Wrap an upstream client in the engine its config asks for.
pub fn build_provider(
    config: ModelConfig,
    model: Arc<dyn ChatModel>,
    deps: &EngineDeps,
) -> Arc<dyn GenerationProvider> {
    match config.kind {
        ModelKind::Chat => Arc::new(ChatProvider::new(config, model, deps.contexts.clone())),
        ModelKind::Agent => Arc::new(AgentProvider::new(
            config,
            model,
            deps.tools.clone(),
            deps.checkpoints.clone(),
        )),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub kind: ModelKind,
    pub default: bool,
}

pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn GenerationProvider>>,
    default_model: String,
}

impl ProviderRegistry {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self { providers: BTreeMap::new(), default_model: default_model.into() }
    }

    /// Build every configured model against its OpenAI-compatible endpoint.
    ///
    /// Models that fail to initialize are logged and skipped rather than
    /// aborting startup.
    pub fn from_config(config: &LlmConfig, deps: &EngineDeps) -> Self {
        let mut registry = Self::new(config.default_model.clone());
        let timeout = Duration::from_millis(config.request_timeout_ms);

        for mc in &config.models {
            match OpenAiCompatModel::from_config(mc, timeout) {
                Ok(model) => {
                    tracing::info!(model_id = %mc.id, kind = ?mc.kind, upstream = %mc.upstream_model, "registered model");
                    registry.register(build_provider(mc.clone(), Arc::new(model), deps));
                }
                Err(e) => {
                    tracing::warn!(model_id = %mc.id, error = %e, "failed to initialize model, skipping");
                }
            }
        }

        if registry.providers.is_empty() {
            tracing::warn!("no models initialized; generate requests will fail until one is configured");
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn GenerationProvider>) {
        self.providers.insert(provider.model_id().to_owned(), provider);
    }

    pub fn get(&self, model_id: &str) -> Option<Arc<dyn GenerationProvider>> {
        self.providers.get(model_id).cloned()
    }

    /// The provider for `model_id`, falling back to the default model.
    pub fn resolve(&self, model_id: Option<&str>) -> Result<Arc<dyn GenerationProvider>> {
        if let Some(id) = model_id {
            if let Some(provider) = self.get(id) {
                return Ok(provider);
            }
            tracing::warn!(requested = %id, default = %self.default_model, "unknown model, using default");
        }
        self.get(&self.default_model).ok_or_else(|| {
            Error::Config(format!("default model '{}' is not available", self.default_model))
        })
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn list_models(&self) -> Vec<ModelInfo> {
        self.providers
            .values()
            .map(|p| ModelInfo {
                id: p.model_id().to_owned(),
                kind: p.kind(),
                default: p.model_id() == self.default_model,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
