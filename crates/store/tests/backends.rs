//! The same behavioral checks against every backend.

use std::sync::Arc;

use ny_store::{delete_recursive, CollectionPath, DocumentStore, FileDocumentStore, MemoryDocumentStore, Query};
use serde_json::json;

async fn exercise(store: Arc<dyn DocumentStore>) {
    let messages = CollectionPath::root("chats").doc("c1").collection("messages");

    for (id, ts) in [("m-b", 3), ("m-a", 1), ("m-c", 2)] {
        store
            .set(&messages.doc(id), json!({ "created_at": ts }))
            .await
            .unwrap();
    }

    let by_field = store.list(&messages, &Query::by_field("created_at")).await.unwrap();
    let ids: Vec<_> = by_field.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["m-a", "m-c", "m-b"]);

    let newest = store
        .list(&messages, &Query::by_id().descending().limit(1))
        .await
        .unwrap();
    assert_eq!(newest[0].0, "m-c");

    let bounded = store
        .list(&messages, &Query::by_id().descending().before("m-c"))
        .await
        .unwrap();
    assert_eq!(bounded.len(), 2);
    assert_eq!(bounded[0].0, "m-b");

    assert!(!store.create(&messages.doc("m-a"), json!({"x": 1})).await.unwrap());
    assert_eq!(
        store.get(&messages.doc("m-a")).await.unwrap(),
        Some(json!({ "created_at": 1 }))
    );

    let chat = CollectionPath::root("chats").doc("c1");
    assert_eq!(store.subcollections(&chat).await.unwrap(), vec!["messages"]);
    assert_eq!(delete_recursive(store.as_ref(), &chat).await.unwrap(), 3);
    assert!(store.list(&messages, &Query::by_id()).await.unwrap().is_empty());
    assert!(store.document_ids(&CollectionPath::root("chats")).await.unwrap().is_empty());
    assert_eq!(delete_recursive(store.as_ref(), &chat).await.unwrap(), 0);
}

#[tokio::test]
async fn memory_backend() {
    exercise(Arc::new(MemoryDocumentStore::new())).await;
}

#[tokio::test]
async fn file_backend() {
    let tmp = tempfile::tempdir().unwrap();
    exercise(Arc::new(FileDocumentStore::open(tmp.path()).unwrap())).await;
}
