mod llm;
mod observability;
mod server;
mod store;
mod tools;

pub use llm::*;
pub use observability::*;
pub use server::*;
pub use store::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.llm.models.iter().find(|m| m.id == id)
    }

    pub fn http_tool(&self, name: &str) -> Option<&HttpToolConfig> {
        self.tools.http.iter().find(|t| t.name == name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Error, field: field.into(), message: message.into() }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Warning, field: field.into(), message: message.into() }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "must be greater than 0",
            ));
        }

        if self.store.op_timeout_ms == 0 {
            errors.push(ConfigError::error("store.op_timeout_ms", "must be greater than 0"));
        }

        if self.checkpoint.default_namespace.is_empty() {
            errors.push(ConfigError::error(
                "checkpoint.default_namespace",
                "namespace must not be empty",
            ));
        }
        for (channel, slot) in &self.checkpoint.known_channels {
            if *slot >= 0 {
                errors.push(ConfigError::error(
                    format!("checkpoint.known_channels.{channel}"),
                    format!("slot {slot} must be negative to stay clear of positional writes"),
                ));
            }
        }
        let mut slots = HashSet::new();
        for (channel, slot) in &self.checkpoint.known_channels {
            if !slots.insert(*slot) {
                errors.push(ConfigError::error(
                    format!("checkpoint.known_channels.{channel}"),
                    format!("slot {slot} is shared with another channel"),
                ));
            }
        }

        if self.llm.context_cache_capacity == 0 {
            errors.push(ConfigError::error(
                "llm.context_cache_capacity",
                "capacity must be greater than 0",
            ));
        }
        if self.llm.models.is_empty() {
            errors.push(ConfigError::warning(
                "llm.models",
                "no models configured: generation requests will fail",
            ));
        } else if self.model(&self.llm.default_model).is_none() {
            errors.push(ConfigError::error(
                "llm.default_model",
                format!("'{}' is not a configured model id", self.llm.default_model),
            ));
        }

        let mut ids = HashSet::new();
        for (i, model) in self.llm.models.iter().enumerate() {
            let field = format!("llm.models[{i}]");
            if !ids.insert(model.id.as_str()) {
                errors.push(ConfigError::error(
                    format!("{field}.id"),
                    format!("duplicate model id '{}'", model.id),
                ));
            }
            if model.base_url.is_empty() {
                errors.push(ConfigError::error(format!("{field}.base_url"), "must not be empty"));
            }
            if model.max_steps == 0 {
                errors.push(ConfigError::error(format!("{field}.max_steps"), "must be greater than 0"));
            }
            for tool in &model.tools {
                if self.http_tool(tool).is_none() {
                    errors.push(ConfigError::error(
                        format!("{field}.tools"),
                        format!("tool '{tool}' is not defined under [[tools.http]]"),
                    ));
                }
            }
            for tool in &model.approval_required {
                if !model.tools.contains(tool) {
                    errors.push(ConfigError::warning(
                        format!("{field}.approval_required"),
                        format!("'{tool}' is not in this model's tool list and will never be called"),
                    ));
                }
            }
            if model.kind == ModelKind::Chat && !model.tools.is_empty() {
                errors.push(ConfigError::warning(
                    format!("{field}.tools"),
                    "chat models do not call tools; use kind = \"agent\"",
                ));
            }
        }

        let mut names = HashSet::new();
        for (i, tool) in self.tools.http.iter().enumerate() {
            if !names.insert(tool.name.as_str()) {
                errors.push(ConfigError::error(
                    format!("tools.http[{i}].name"),
                    format!("duplicate tool name '{}'", tool.name),
                ));
            }
            if tool.url.is_empty() {
                errors.push(ConfigError::error(format!("tools.http[{i}].url"), "must not be empty"));
            }
        }

        errors
    }
}
