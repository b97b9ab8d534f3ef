use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ny_domain::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::version::next_version;

/// Channel name → version.
pub type ChannelVersions = BTreeMap<String, String>;

/// Free-form checkpoint metadata (`source`, `step`, ...). `list` filters on
/// exact equality of top-level fields.
pub type Metadata = serde_json::Map<String, Value>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Addressing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A position in a thread's history. Without a checkpoint id it means
/// "the latest checkpoint".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointAddress {
    pub thread_id: String,
    pub namespace: String,
    #[serde(default)]
    pub checkpoint_id: Option<String>,
}

impl CheckpointAddress {
    pub fn latest(thread_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            namespace: namespace.into(),
            checkpoint_id: None,
        }
    }

    pub fn at(&self, checkpoint_id: impl Into<String>) -> Self {
        Self {
            thread_id: self.thread_id.clone(),
            namespace: self.namespace.clone(),
            checkpoint_id: Some(checkpoint_id.into()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checkpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Time-ordered; a child always sorts after its parent.
    pub id: String,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub channel_versions: ChannelVersions,
    /// Materialized channel values. Never stored in the checkpoint record
    /// itself: they go to blobs on `put` and come back on load.
    #[serde(skip)]
    pub channel_values: BTreeMap<String, Value>,
    /// Engine state that is not a channel.
    #[serde(default)]
    pub payload: Value,
}

impl Checkpoint {
    /// The first checkpoint of a thread.
    pub fn empty() -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            ts: Utc::now(),
            channel_versions: ChannelVersions::new(),
            channel_values: BTreeMap::new(),
            payload: Value::Null,
        }
    }

    /// A new checkpoint carrying over this one's channels and payload.
    pub fn successor(&self) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            ts: Utc::now(),
            channel_versions: self.channel_versions.clone(),
            channel_values: self.channel_values.clone(),
            payload: self.payload.clone(),
        }
    }

    /// Store a new value for `channel`, bumping its version. The new
    /// version is recorded in `new_versions` for the following `put`.
    pub fn update_channel(
        &mut self,
        channel: &str,
        value: Value,
        new_versions: &mut ChannelVersions,
    ) -> Result<String> {
        let version = next_version(self.channel_versions.get(channel).map(String::as_str))?;
        self.channel_versions.insert(channel.to_owned(), version.clone());
        self.channel_values.insert(channel.to_owned(), value);
        new_versions.insert(channel.to_owned(), version.clone());
        Ok(version)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending writes & views
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: String,
    pub channel: String,
    pub value: Value,
    /// Position in the producing call, or the fixed (negative) slot of a
    /// known channel.
    pub write_index: i64,
}

/// A loaded checkpoint with its channel values and pending writes.
#[derive(Debug, Clone)]
pub struct CheckpointView {
    pub address: CheckpointAddress,
    pub checkpoint: Checkpoint,
    pub metadata: Metadata,
    pub parent: Option<CheckpointAddress>,
    pub pending_writes: Vec<PendingWrite>,
    /// Channels whose referenced blob could not be found.
    pub missing_channels: Vec<String>,
}

impl CheckpointView {
    pub fn checkpoint_id(&self) -> &str {
        &self.checkpoint.id
    }

    /// Latest pending write on `channel`, if any task produced one.
    pub fn pending_write(&self, channel: &str) -> Option<&PendingWrite> {
        self.pending_writes.iter().rev().find(|w| w.channel == channel)
    }
}
