//! Generation engines behind `/v1/generate` and the upstream model client
//! they drive.

pub mod agent;
pub mod cache;
pub mod chat;
pub mod context;
pub mod openai_compat;
pub mod registry;
pub mod tools;
pub mod traits;
pub(crate) mod run;
pub(crate) mod sse;
pub(crate) mod util;

pub use agent::{AgentProvider, MESSAGES_CHANNEL, TOOL_RESULTS_CHANNEL};
pub use cache::BoundedCache;
pub use chat::ChatProvider;
pub use context::{ContextCache, ContextKey};
pub use openai_compat::OpenAiCompatModel;
pub use registry::{build_provider, EngineDeps, ModelInfo, ProviderRegistry};
pub use tools::{HttpTool, Tool, ToolRegistry};
pub use traits::{ChatModel, ChatRequest, ChatResponse, GenerationProvider, GenerationRequest};
pub use util::resolve_env_secret;
