use ny_domain::error::Result;

use crate::document::DocumentStore;
use crate::path::DocPath;

/// Delete `root` and everything beneath it.
///
/// The tree is walked with an explicit work-list, so depth costs heap, not
/// stack. Children are deleted before their parents; an interrupted run
/// leaves the parent in place and can simply be repeated.
///
/// Returns the number of documents that held data. Deleting a tree that
/// does not exist removes nothing and returns 0.
pub async fn delete_recursive(store: &dyn DocumentStore, root: &DocPath) -> Result<usize> {
    let mut pending = vec![root.clone()];
    let mut visited = Vec::new();

    while let Some(doc) = pending.pop() {
        for name in store.subcollections(&doc).await? {
            let collection = doc.collection(name);
            for id in store.document_ids(&collection).await? {
                pending.push(collection.doc(id));
            }
        }
        visited.push(doc);
    }

    let mut removed = 0;
    for doc in visited.iter().rev() {
        if store.delete(doc).await? {
            removed += 1;
        }
    }
    tracing::debug!(root = %root, visited = visited.len(), removed, "recursive delete finished");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDocumentStore;
    use crate::path::CollectionPath;
    use serde_json::json;

    #[tokio::test]
    async fn removes_nested_tree_but_not_siblings() {
        let store = MemoryDocumentStore::new();
        let t1 = CollectionPath::root("checkpoints").doc("t1");
        let t2 = CollectionPath::root("checkpoints").doc("t2");
        let ns = t1.collection("checkpoint_namespaces").doc("default");
        store.set(&ns.collection("checkpoints").doc("a"), json!({})).await.unwrap();
        store.set(&ns.collection("blobs").doc("messages_1"), json!({})).await.unwrap();
        store
            .set(&ns.collection("writes").doc("a").collection("items").doc("task_0"), json!({}))
            .await
            .unwrap();
        store.set(&t2.collection("x").doc("y"), json!({})).await.unwrap();

        let removed = delete_recursive(&store, &t1).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn deep_chain_does_not_recurse() {
        let store = MemoryDocumentStore::new();
        let root = CollectionPath::root("r").doc("0");
        let mut doc = root.clone();
        for i in 0..300 {
            doc = doc.collection("n").doc(i.to_string());
        }
        store.set(&doc, json!({})).await.unwrap();
        assert_eq!(delete_recursive(&store, &root).await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn missing_root_is_noop() {
        let store = MemoryDocumentStore::new();
        let root = CollectionPath::root("checkpoints").doc("ghost");
        assert_eq!(delete_recursive(&store, &root).await.unwrap(), 0);
    }
}
