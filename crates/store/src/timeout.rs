use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use ny_domain::error::{Error, Result};

use crate::document::{Document, DocumentStore, Query};
use crate::path::{CollectionPath, DocPath};

/// Bounds every call on the wrapped store. A call that overruns fails with
/// `Error::Timeout`; the caller decides whether to retry.
pub struct TimeoutStore<S> {
    inner: S,
    limit: Duration,
}

impl<S: DocumentStore> TimeoutStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T>(
        &self,
        op: &str,
        target: impl Display,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(op, target = %target, limit_ms = self.limit.as_millis() as u64, "store call timed out");
                Err(Error::Timeout(format!(
                    "store {op} {target} exceeded {}ms",
                    self.limit.as_millis()
                )))
            }
        }
    }
}

#[async_trait::async_trait]
impl<S: DocumentStore> DocumentStore for TimeoutStore<S> {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        self.bounded("get", path, self.inner.get(path)).await
    }

    async fn set(&self, path: &DocPath, doc: Document) -> Result<()> {
        self.bounded("set", path, self.inner.set(path, doc)).await
    }

    async fn create(&self, path: &DocPath, doc: Document) -> Result<bool> {
        self.bounded("create", path, self.inner.create(path, doc)).await
    }

    async fn delete(&self, path: &DocPath) -> Result<bool> {
        self.bounded("delete", path, self.inner.delete(path)).await
    }

    async fn list(&self, collection: &CollectionPath, query: &Query) -> Result<Vec<(String, Document)>> {
        self.bounded("list", collection, self.inner.list(collection, query)).await
    }

    async fn document_ids(&self, collection: &CollectionPath) -> Result<Vec<String>> {
        self.bounded("document_ids", collection, self.inner.document_ids(collection))
            .await
    }

    async fn subcollections(&self, path: &DocPath) -> Result<Vec<String>> {
        self.bounded("subcollections", path, self.inner.subcollections(path)).await
    }
}
