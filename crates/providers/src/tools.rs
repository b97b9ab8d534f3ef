//! Tools an agent model may call.
//!
//! Tools are thin HTTP adapters declared in `[[tools.http]]`. The registry
//! hands each agent the definitions it was configured with and dispatches
//! calls by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ny_domain::config::{HttpMethod, HttpToolConfig, ToolsConfig};
use ny_domain::error::{Error, Result};
use ny_domain::tool::ToolDefinition;
use serde_json::Value;

use crate::util::{from_reqwest, resolve_env_secret};

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool; the returned text goes back to the model verbatim.
    async fn call(&self, arguments: &Value) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every `[[tools.http]]` entry. A tool whose credential cannot
    /// be resolved is skipped with a warning.
    pub fn from_config(config: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        for cfg in &config.http {
            match HttpTool::from_config(cfg) {
                Ok(tool) => {
                    tracing::info!(tool = %cfg.name, url = %cfg.url, "registered http tool");
                    registry.register(Arc::new(tool));
                }
                Err(e) => {
                    tracing::warn!(tool = %cfg.name, error = %e, "failed to initialize tool, skipping");
                }
            }
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions for `names`, in that order; unknown names are skipped.
    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.definition())
            .collect()
    }

    /// Dispatch a call by name.
    pub async fn call(&self, name: &str, arguments: &Value) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown tool '{name}'")))?;
        tool.call(arguments).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpTool {
    config: HttpToolConfig,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpTool {
    pub fn from_config(config: &HttpToolConfig) -> Result<Self> {
        let token = resolve_env_secret(config.token_env.as_deref())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self { config: config.clone(), token, client })
    }

    fn request(&self, arguments: &Value) -> reqwest::RequestBuilder {
        let builder = match self.config.method {
            HttpMethod::Post => self.client.post(&self.config.url).json(arguments),
            HttpMethod::Get => self.client.get(&self.config.url).query(&query_pairs(arguments)),
        };
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Flatten top-level arguments into query pairs. Nested values are sent as
/// their JSON text.
fn query_pairs(arguments: &Value) -> Vec<(String, String)> {
    let Some(map) = arguments.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect()
}

#[async_trait::async_trait]
impl Tool for HttpTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.config.name.clone(),
            description: self.config.description.clone(),
            parameters: self.config.parameters.clone(),
        }
    }

    async fn call(&self, arguments: &Value) -> Result<String> {
        tracing::debug!(tool = %self.config.name, "http tool call");
        let resp = self.request(arguments).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let body = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::Http(format!(
                "tool '{}' returned HTTP {}: {}",
                self.config.name,
                status.as_u16(),
                body
            )));
        }
        Ok(body)
    }
}
