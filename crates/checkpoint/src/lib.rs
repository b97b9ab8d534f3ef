//! Durable, resumable execution state.
//!
//! A thread's history is a linear chain of checkpoints. Each checkpoint
//! records the version of every channel live at that step; channel values
//! live in immutable blobs keyed by `(channel, version)`, and writes
//! produced by a step but not yet folded into a checkpoint live in the
//! write log.
//!
//! Storage layout under the document store:
//!
//! ```text
//! checkpoints/{thread}/checkpoint_namespaces/{ns}/checkpoints/{checkpoint_id}
//! checkpoints/{thread}/checkpoint_namespaces/{ns}/blobs/{channel}_{version}
//! checkpoints/{thread}/checkpoint_namespaces/{ns}/writes/{checkpoint_id}/items/{task_id}_{slot}
//! ```

pub mod blobs;
pub mod codec;
mod layout;
pub mod store;
pub mod types;
pub mod version;
pub mod writes;

pub use blobs::{BlobEntry, BlobStore, LoadedBlobs};
pub use store::{CheckpointQuery, CheckpointStore};
pub use types::{ChannelVersions, Checkpoint, CheckpointAddress, CheckpointView, Metadata, PendingWrite};
pub use version::next_version;
pub use writes::{WriteLog, WriteReport};
