use std::collections::{BTreeMap, BTreeSet};

use ny_domain::error::Result;
use parking_lot::RwLock;

use crate::document::{Document, DocumentStore, Query};
use crate::path::{CollectionPath, DocPath};

/// Process-local backend. Keys are full path segment lists, so everything
/// under one prefix is a contiguous range of the map.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<BTreeMap<Vec<String>, Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Child segment at `depth` of every key under `prefix`.
    fn children_at(&self, prefix: &[String]) -> Vec<String> {
        let docs = self.docs.read();
        let depth = prefix.len();
        let names: BTreeSet<String> = docs
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| k.len() > depth)
            .map(|(k, _)| k[depth].clone())
            .collect();
        names.into_iter().collect()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        Ok(self.docs.read().get(path.segments()).cloned())
    }

    async fn set(&self, path: &DocPath, doc: Document) -> Result<()> {
        self.docs.write().insert(path.segments().to_vec(), doc);
        Ok(())
    }

    async fn create(&self, path: &DocPath, doc: Document) -> Result<bool> {
        let mut docs = self.docs.write();
        if docs.contains_key(path.segments()) {
            return Ok(false);
        }
        docs.insert(path.segments().to_vec(), doc);
        Ok(true)
    }

    async fn delete(&self, path: &DocPath) -> Result<bool> {
        Ok(self.docs.write().remove(path.segments()).is_some())
    }

    async fn list(&self, collection: &CollectionPath, query: &Query) -> Result<Vec<(String, Document)>> {
        let prefix = collection.segments();
        let depth = prefix.len() + 1;
        let snapshot: Vec<(String, Document)> = {
            let docs = self.docs.read();
            docs.range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .filter(|(k, _)| k.len() == depth)
                .map(|(k, v)| (k[depth - 1].clone(), v.clone()))
                .collect()
        };
        Ok(query.apply(snapshot))
    }

    async fn document_ids(&self, collection: &CollectionPath) -> Result<Vec<String>> {
        Ok(self.children_at(collection.segments()))
    }

    async fn subcollections(&self, path: &DocPath) -> Result<Vec<String>> {
        Ok(self.children_at(path.segments()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_does_not_overwrite() {
        let store = MemoryDocumentStore::new();
        let path = CollectionPath::root("c").doc("d");
        assert!(store.create(&path, json!({"v": 1})).await.unwrap());
        assert!(!store.create(&path, json!({"v": 2})).await.unwrap());
        assert_eq!(store.get(&path).await.unwrap(), Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn implicit_parents_are_listed_as_ids_only() {
        let store = MemoryDocumentStore::new();
        let threads = CollectionPath::root("checkpoints");
        let nested = threads.doc("t1").collection("items").doc("x");
        store.set(&nested, json!({})).await.unwrap();

        assert_eq!(store.document_ids(&threads).await.unwrap(), vec!["t1"]);
        assert!(store.list(&threads, &Query::by_id()).await.unwrap().is_empty());
        assert_eq!(store.subcollections(&threads.doc("t1")).await.unwrap(), vec!["items"]);
    }

    #[tokio::test]
    async fn sibling_prefixes_do_not_leak() {
        let store = MemoryDocumentStore::new();
        store.set(&CollectionPath::root("c").doc("a"), json!(1)).await.unwrap();
        store.set(&CollectionPath::root("c").doc("ab"), json!(2)).await.unwrap();
        store
            .set(&CollectionPath::root("c").doc("a").collection("s").doc("z"), json!(3))
            .await
            .unwrap();

        let listed = store.list(&CollectionPath::root("c"), &Query::by_id()).await.unwrap();
        assert_eq!(listed.len(), 2);
        let subs = store.subcollections(&CollectionPath::root("c").doc("ab")).await.unwrap();
        assert!(subs.is_empty());
    }
}
