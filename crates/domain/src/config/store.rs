use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; everything is lost on restart.
    Memory,
    /// One JSON file per document under `store.path`.
    #[default]
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "d_path")]
    pub path: PathBuf,
    /// Bound applied to every individual store call.
    #[serde(default = "d_10000")]
    pub op_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: d_path(),
            op_timeout_ms: 10_000,
        }
    }
}

fn d_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_10000() -> u64 {
    10_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checkpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Channel name written by an engine when it pauses for review.
pub const INTERRUPT_CHANNEL: &str = "__interrupt__";
/// Channel name recording the decisions a resume was given.
pub const RESUME_CHANNEL: &str = "__resume__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "d_namespace")]
    pub default_namespace: String,
    /// Channels whose pending writes always occupy one fixed slot per task,
    /// keyed by channel name. Slots must be negative so they never collide
    /// with positional indices.
    #[serde(default = "d_known_channels")]
    pub known_channels: BTreeMap<String, i64>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            default_namespace: d_namespace(),
            known_channels: d_known_channels(),
        }
    }
}

fn d_namespace() -> String {
    "default".into()
}

fn d_known_channels() -> BTreeMap<String, i64> {
    BTreeMap::from([
        ("__error__".to_string(), -1),
        ("__scheduled__".to_string(), -2),
        (INTERRUPT_CHANNEL.to_string(), -3),
        (RESUME_CHANNEL.to_string(), -4),
    ])
}
