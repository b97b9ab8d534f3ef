use std::collections::BTreeMap;
use std::sync::Arc;

use ny_domain::config::CheckpointConfig;
use ny_domain::error::{Error, Result};
use ny_domain::stream::BoxStream;
use ny_domain::trace::TraceEvent;
use ny_store::{delete_recursive, DocumentStore, Query};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blobs::{BlobEntry, BlobStore};
use crate::codec::{from_document, to_document};
use crate::layout;
use crate::types::{ChannelVersions, Checkpoint, CheckpointAddress, CheckpointView, Metadata};
use crate::writes::{WriteLog, WriteReport};

/// Checkpoint records fetched per round-trip while listing.
const LIST_PAGE: usize = 32;

/// The stored checkpoint record. Channel values are not part of it.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    checkpoint_id: String,
    #[serde(default)]
    parent_checkpoint_id: Option<String>,
    checkpoint: Checkpoint,
    #[serde(default)]
    metadata: Metadata,
}

/// History filter for [`CheckpointStore::list`].
#[derive(Debug, Clone, Default)]
pub struct CheckpointQuery {
    /// Required: listing across threads is refused.
    pub thread_id: Option<String>,
    /// Defaults to the configured namespace.
    pub namespace: Option<String>,
    /// Every key must be present in the metadata with an equal value.
    pub filter: Option<Metadata>,
    /// Only checkpoints with an id strictly below this one.
    pub before: Option<String>,
    pub limit: Option<usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CheckpointStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sole writer of checkpoints, blobs and pending writes.
///
/// Callers must not run two writers on the same thread at once. Writes are
/// ordered blobs first, checkpoint record last: a reader that finds a
/// record can trust the blobs it references to have been written.
#[derive(Clone)]
pub struct CheckpointStore {
    docs: Arc<dyn DocumentStore>,
    blobs: BlobStore,
    writes: WriteLog,
    default_namespace: String,
}

impl CheckpointStore {
    pub fn new(docs: Arc<dyn DocumentStore>, config: &CheckpointConfig) -> Self {
        Self {
            blobs: BlobStore::new(docs.clone()),
            writes: WriteLog::new(docs.clone(), config.known_channels.clone()),
            default_namespace: config.default_namespace.clone(),
            docs,
        }
    }

    /// Address of the latest checkpoint of `thread_id` in the default namespace.
    pub fn latest(&self, thread_id: &str) -> CheckpointAddress {
        CheckpointAddress::latest(thread_id, self.default_namespace.clone())
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    // ── reads ──────────────────────────────────────────────────────

    /// Load the checkpoint at `address`, or the latest one when no id is
    /// given. `Ok(None)` means nothing has run on this thread yet.
    pub async fn get_tuple(&self, address: &CheckpointAddress) -> Result<Option<CheckpointView>> {
        let thread_id = &address.thread_id;
        let namespace = &address.namespace;

        let doc = match &address.checkpoint_id {
            Some(id) => {
                let path = layout::checkpoints(thread_id, namespace).doc(id.clone());
                self.docs.get(&path).await?
            }
            None => {
                let query = Query::by_id().descending().limit(1);
                self.docs
                    .list(&layout::checkpoints(thread_id, namespace), &query)
                    .await?
                    .into_iter()
                    .next()
                    .map(|(_, doc)| doc)
            }
        };

        match doc {
            None => Ok(None),
            Some(doc) => {
                let record: CheckpointRecord = from_document("checkpoint", doc)?;
                self.hydrate(thread_id, namespace, record).await.map(Some)
            }
        }
    }

    /// Checkpoints of one thread, newest first. The returned stream loads
    /// records page by page and hydrates each one only when polled.
    pub fn list(&self, query: CheckpointQuery) -> Result<BoxStream<'static, Result<CheckpointView>>> {
        let Some(thread_id) = query.thread_id else {
            return Err(Error::InvalidRequest(
                "listing checkpoints requires a thread id".into(),
            ));
        };
        let namespace = query
            .namespace
            .unwrap_or_else(|| self.default_namespace.clone());
        let store = self.clone();
        let filter = query.filter.unwrap_or_default();
        let limit = query.limit;
        let mut cursor = query.before;

        let stream = async_stream::stream! {
            let collection = layout::checkpoints(&thread_id, &namespace);
            let mut yielded = 0usize;

            'pages: loop {
                if limit.is_some_and(|l| yielded >= l) {
                    break;
                }
                let mut page_query = Query::by_id().descending().limit(LIST_PAGE);
                if let Some(bound) = &cursor {
                    page_query = page_query.before(bound.clone());
                }
                let page = match store.docs.list(&collection, &page_query).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                let exhausted = page.len() < LIST_PAGE;

                for (id, doc) in page {
                    cursor = Some(id);
                    let view = match store.view_if_matching(&thread_id, &namespace, doc, &filter).await {
                        Ok(Some(view)) => view,
                        Ok(None) => continue,
                        Err(e) => {
                            yield Err(e);
                            break 'pages;
                        }
                    };
                    yielded += 1;
                    yield Ok(view);
                    if limit.is_some_and(|l| yielded >= l) {
                        break 'pages;
                    }
                }
                if exhausted {
                    break;
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn view_if_matching(
        &self,
        thread_id: &str,
        namespace: &str,
        doc: Value,
        filter: &Metadata,
    ) -> Result<Option<CheckpointView>> {
        let record: CheckpointRecord = from_document("checkpoint", doc)?;
        if !metadata_matches(&record.metadata, filter) {
            return Ok(None);
        }
        self.hydrate(thread_id, namespace, record).await.map(Some)
    }

    async fn hydrate(
        &self,
        thread_id: &str,
        namespace: &str,
        record: CheckpointRecord,
    ) -> Result<CheckpointView> {
        let mut checkpoint = record.checkpoint;
        let loaded = self
            .blobs
            .load_blobs(thread_id, namespace, &checkpoint.channel_versions)
            .await?;
        let pending_writes = self
            .writes
            .load_writes(thread_id, namespace, &record.checkpoint_id)
            .await?;

        if !loaded.missing.is_empty() {
            tracing::warn!(
                thread_id,
                namespace,
                checkpoint_id = %record.checkpoint_id,
                missing = ?loaded.missing,
                "checkpoint references blobs that are not stored"
            );
        }
        TraceEvent::CheckpointLoaded {
            thread_id: thread_id.to_owned(),
            namespace: namespace.to_owned(),
            checkpoint_id: record.checkpoint_id.clone(),
            channels: loaded.values.len(),
            pending_writes: pending_writes.len(),
            missing_channels: loaded.missing.len(),
        }
        .emit();

        checkpoint.channel_values = loaded.values;
        let address = CheckpointAddress::latest(thread_id, namespace).at(record.checkpoint_id);
        let parent = record
            .parent_checkpoint_id
            .map(|id| CheckpointAddress::latest(thread_id, namespace).at(id));

        Ok(CheckpointView {
            address,
            checkpoint,
            metadata: record.metadata,
            parent,
            pending_writes,
            missing_channels: loaded.missing,
        })
    }

    // ── writes ─────────────────────────────────────────────────────

    /// Record `checkpoint` as the child of `address` (the caller's current
    /// position; no id means this is the thread's first checkpoint).
    ///
    /// Blobs are written for exactly the channels in `new_versions`: the
    /// channel's value if the checkpoint carries one, the empty sentinel
    /// otherwise. Returns the address of the new checkpoint.
    pub async fn put(
        &self,
        address: &CheckpointAddress,
        checkpoint: Checkpoint,
        metadata: Metadata,
        new_versions: &ChannelVersions,
    ) -> Result<CheckpointAddress> {
        let thread_id = &address.thread_id;
        let namespace = &address.namespace;
        let collection = layout::checkpoints(thread_id, namespace);
        let record_path = collection.doc(checkpoint.id.clone());

        if self.docs.get(&record_path).await?.is_some() {
            return Err(Error::Integrity(format!(
                "checkpoint {} already exists in thread {thread_id}",
                checkpoint.id
            )));
        }
        if let Some(parent_id) = &address.checkpoint_id {
            if checkpoint.id.as_str() <= parent_id.as_str() {
                return Err(Error::Integrity(format!(
                    "checkpoint {} does not sort after its parent {parent_id}",
                    checkpoint.id
                )));
            }
            if self.docs.get(&collection.doc(parent_id.clone())).await?.is_none() {
                return Err(Error::Integrity(format!(
                    "parent checkpoint {parent_id} missing in thread {thread_id}"
                )));
            }
        }

        let mut entries = BTreeMap::new();
        for (channel, version) in new_versions {
            if checkpoint.channel_versions.get(channel) != Some(version) {
                return Err(Error::Integrity(format!(
                    "new version {version} of channel '{channel}' is not in the checkpoint's version map"
                )));
            }
            entries.insert(
                channel.clone(),
                BlobEntry {
                    version: version.clone(),
                    value: checkpoint.channel_values.get(channel).cloned(),
                },
            );
        }
        let blobs = self.blobs.put_blobs(thread_id, namespace, &entries).await?;

        let checkpoint_id = checkpoint.id.clone();
        let record = CheckpointRecord {
            checkpoint_id: checkpoint_id.clone(),
            parent_checkpoint_id: address.checkpoint_id.clone(),
            checkpoint,
            metadata,
        };
        let doc = to_document(&record)?;
        if !self.docs.create(&record_path, doc).await? {
            return Err(Error::Integrity(format!(
                "checkpoint {checkpoint_id} was created concurrently in thread {thread_id}"
            )));
        }

        TraceEvent::CheckpointWritten {
            thread_id: thread_id.clone(),
            namespace: namespace.clone(),
            checkpoint_id: checkpoint_id.clone(),
            parent_id: address.checkpoint_id.clone(),
            blobs,
        }
        .emit();
        Ok(address.at(checkpoint_id))
    }

    /// Store writes produced by `task_id` against the checkpoint at
    /// `address`, which must name a checkpoint id.
    pub async fn put_writes(
        &self,
        address: &CheckpointAddress,
        task_id: &str,
        writes: &[(String, Value)],
    ) -> Result<WriteReport> {
        let Some(checkpoint_id) = &address.checkpoint_id else {
            return Err(Error::InvalidRequest(
                "pending writes need a checkpoint id".into(),
            ));
        };
        self.writes
            .put_writes(&address.thread_id, &address.namespace, checkpoint_id, task_id, writes)
            .await
    }

    /// Remove every checkpoint, blob and write of `thread_id` across all
    /// namespaces. Unknown threads are a no-op. Returns documents removed.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<usize> {
        let removed = delete_recursive(self.docs.as_ref(), &layout::thread_doc(thread_id)).await?;
        TraceEvent::ThreadDeleted {
            thread_id: thread_id.to_owned(),
            documents: removed,
        }
        .emit();
        Ok(removed)
    }
}

fn metadata_matches(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(k, v)| metadata.get(k).is_some_and(|m| m == v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ny_store::MemoryDocumentStore;
    use serde_json::json;

    fn store() -> CheckpointStore {
        CheckpointStore::new(Arc::new(MemoryDocumentStore::new()), &CheckpointConfig::default())
    }

    #[test]
    fn filter_requires_every_key() {
        let meta: Metadata = serde_json::from_value(json!({"source": "loop", "step": 1})).unwrap();
        let hit: Metadata = serde_json::from_value(json!({"source": "loop"})).unwrap();
        let miss: Metadata = serde_json::from_value(json!({"source": "loop", "step": 2})).unwrap();
        assert!(metadata_matches(&meta, &hit));
        assert!(!metadata_matches(&meta, &miss));
        assert!(metadata_matches(&meta, &Metadata::new()));
    }

    #[tokio::test]
    async fn list_without_thread_fails_fast() {
        let err = store().list(CheckpointQuery::default()).err().unwrap();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn dangling_parent_is_rejected() {
        let store = store();
        let addr = store.latest("t1").at("00000000-0000-7000-8000-000000000000");
        let err = store
            .put(&addr, Checkpoint::empty(), Metadata::new(), &ChannelVersions::new())
            .await
            .unwrap_err();
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn record_is_never_overwritten() {
        let store = store();
        let first = Checkpoint::empty();
        store
            .put(&store.latest("t1"), first.clone(), Metadata::new(), &ChannelVersions::new())
            .await
            .unwrap();
        let err = store
            .put(&store.latest("t1"), first, Metadata::new(), &ChannelVersions::new())
            .await
            .unwrap_err();
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn put_writes_requires_checkpoint_id() {
        let store = store();
        let err = store
            .put_writes(&store.latest("t1"), "task", &[("a".into(), json!(1))])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
