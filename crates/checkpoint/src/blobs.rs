use std::collections::BTreeMap;
use std::sync::Arc;

use ny_domain::error::{Error, Result};
use ny_store::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{from_document, to_document, ValueType};
use crate::layout;
use crate::types::ChannelVersions;

/// One channel to persist: its version, and its value if it was produced
/// this step (`None` stores the empty sentinel).
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub version: String,
    pub value: Option<Value>,
}

#[derive(Debug, Default)]
pub struct LoadedBlobs {
    pub values: BTreeMap<String, Value>,
    /// Channels whose blob was not found at the requested version.
    pub missing: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct BlobRecord {
    channel: String,
    version: String,
    #[serde(rename = "type")]
    value_type: ValueType,
    #[serde(default)]
    data: Value,
}

/// Immutable `(channel, version)` → value storage, scoped per thread and
/// namespace.
#[derive(Clone)]
pub struct BlobStore {
    docs: Arc<dyn DocumentStore>,
}

impl BlobStore {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    /// Persist every entry. Re-writing a key with identical content is a
    /// no-op; with different content it is an integrity violation and the
    /// stored blob is left untouched. Returns how many blobs were new.
    pub async fn put_blobs(
        &self,
        thread_id: &str,
        namespace: &str,
        entries: &BTreeMap<String, BlobEntry>,
    ) -> Result<usize> {
        let mut written = 0;
        for (channel, entry) in entries {
            let record = BlobRecord {
                channel: channel.clone(),
                version: entry.version.clone(),
                value_type: if entry.value.is_some() { ValueType::Json } else { ValueType::Empty },
                data: entry.value.clone().unwrap_or(Value::Null),
            };
            let doc = to_document(&record)?;
            let path = layout::blob_doc(thread_id, namespace, channel, &entry.version);

            if self.docs.create(&path, doc.clone()).await? {
                written += 1;
                continue;
            }
            let existing = self.docs.get(&path).await?;
            if existing.as_ref() != Some(&doc) {
                tracing::error!(
                    thread_id,
                    namespace,
                    channel = %channel,
                    version = %entry.version,
                    "blob key rewritten with different content"
                );
                return Err(Error::Integrity(format!(
                    "blob {channel}@{} already stored with different content",
                    entry.version
                )));
            }
        }
        Ok(written)
    }

    /// Fetch the blob of each `(channel, version)`. Empty sentinels are
    /// omitted from `values`; absent blobs are reported in `missing`.
    pub async fn load_blobs(
        &self,
        thread_id: &str,
        namespace: &str,
        versions: &ChannelVersions,
    ) -> Result<LoadedBlobs> {
        let mut loaded = LoadedBlobs::default();
        for (channel, version) in versions {
            let path = layout::blob_doc(thread_id, namespace, channel, version);
            let Some(doc) = self.docs.get(&path).await? else {
                loaded.missing.push(channel.clone());
                continue;
            };
            let record: BlobRecord = from_document("blob", doc)?;
            if record.value_type == ValueType::Json {
                loaded.values.insert(channel.clone(), record.data);
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ny_store::MemoryDocumentStore;
    use serde_json::json;

    fn entry(version: &str, value: Option<Value>) -> BlobEntry {
        BlobEntry { version: version.into(), value }
    }

    #[tokio::test]
    async fn empty_sentinel_is_omitted_on_load() {
        let blobs = BlobStore::new(Arc::new(MemoryDocumentStore::new()));
        let entries = BTreeMap::from([
            ("messages".to_string(), entry("1", Some(json!(["hi"])))),
            ("scratch".to_string(), entry("1", None)),
        ]);
        assert_eq!(blobs.put_blobs("t", "default", &entries).await.unwrap(), 2);

        let versions = ChannelVersions::from([
            ("messages".to_string(), "1".to_string()),
            ("scratch".to_string(), "1".to_string()),
        ]);
        let loaded = blobs.load_blobs("t", "default", &versions).await.unwrap();
        assert_eq!(loaded.values.len(), 1);
        assert_eq!(loaded.values["messages"], json!(["hi"]));
        assert!(loaded.missing.is_empty());
    }

    #[tokio::test]
    async fn identical_rewrite_is_noop_but_conflict_fails() {
        let blobs = BlobStore::new(Arc::new(MemoryDocumentStore::new()));
        let same = BTreeMap::from([("c".to_string(), entry("1", Some(json!(1))))]);
        blobs.put_blobs("t", "default", &same).await.unwrap();
        assert_eq!(blobs.put_blobs("t", "default", &same).await.unwrap(), 0);

        let different = BTreeMap::from([("c".to_string(), entry("1", Some(json!(2))))]);
        let err = blobs.put_blobs("t", "default", &different).await.unwrap_err();
        assert!(err.is_integrity());

        let versions = ChannelVersions::from([("c".to_string(), "1".to_string())]);
        let loaded = blobs.load_blobs("t", "default", &versions).await.unwrap();
        assert_eq!(loaded.values["c"], json!(1));
    }

    #[tokio::test]
    async fn missing_blob_is_reported() {
        let blobs = BlobStore::new(Arc::new(MemoryDocumentStore::new()));
        let versions = ChannelVersions::from([("messages".to_string(), "7".to_string())]);
        let loaded = blobs.load_blobs("t", "default", &versions).await.unwrap();
        assert!(loaded.values.is_empty());
        assert_eq!(loaded.missing, vec!["messages"]);
    }
}
