//! Filesystem backend.
//!
//! Layout: a collection is a directory, a document is `<id>.json` inside
//! it, and a document's subcollections live in the sibling directory
//! `<id>/`. Writes go through a temp file and an atomic rename, so a reader
//! sees either the old or the new document, never a torn one.
//!
//! `create` is check-then-write and relies on the single-writer-per-thread
//! discipline of the callers.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ny_domain::error::{Error, Result};

use crate::document::{Document, DocumentStore, Query};
use crate::path::{CollectionPath, DocPath};

pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        tracing::info!(root = %root.display(), "file document store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_of(&self, segments: &[String]) -> Result<PathBuf> {
        let mut dir = self.root.clone();
        for s in segments {
            check_segment(s)?;
            dir.push(s);
        }
        Ok(dir)
    }

    fn doc_file(&self, path: &DocPath) -> Result<PathBuf> {
        let dir = self.dir_of(path.parent().segments())?;
        check_segment(path.id())?;
        Ok(dir.join(format!("{}.json", path.id())))
    }
}

/// Segments become file names, so they must not traverse or hide.
fn check_segment(s: &str) -> Result<()> {
    if s.is_empty()
        || s.starts_with('.')
        || s.contains(['/', '\\', '\0'])
    {
        return Err(Error::InvalidRequest(format!("invalid path segment '{s}'")));
    }
    Ok(())
}

fn io_err(path: &Path, e: std::io::Error) -> Error {
    Error::Store(format!("{}: {e}", path.display()))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
}

fn read_doc(path: &Path) -> Result<Option<Document>> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Integrity(format!("{}: corrupt document: {e}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

fn write_doc(path: &Path, doc: &Document) -> Result<()> {
    let bytes = serde_json::to_vec(doc).map_err(|e| Error::Serialization(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    atomic_write(path, &bytes).map_err(|e| io_err(path, e))
}

fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("doc"),
        uuid::Uuid::new_v4()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut file = std::fs::File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Visible entries of `dir` as (name, is_dir); a missing directory is empty.
fn entries(dir: &Path) -> Result<Vec<(String, bool)>> {
    let rd = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir, e)),
    };
    let mut out = Vec::new();
    for entry in rd {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let is_dir = entry.file_type().map_err(|e| io_err(dir, e))?.is_dir();
        out.push((name, is_dir));
    }
    Ok(out)
}

#[async_trait::async_trait]
impl DocumentStore for FileDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        let file = self.doc_file(path)?;
        blocking(move || read_doc(&file)).await
    }

    async fn set(&self, path: &DocPath, doc: Document) -> Result<()> {
        let file = self.doc_file(path)?;
        blocking(move || write_doc(&file, &doc)).await
    }

    async fn create(&self, path: &DocPath, doc: Document) -> Result<bool> {
        let file = self.doc_file(path)?;
        blocking(move || {
            if file.exists() {
                return Ok(false);
            }
            write_doc(&file, &doc)?;
            Ok(true)
        })
        .await
    }

    async fn delete(&self, path: &DocPath) -> Result<bool> {
        let file = self.doc_file(path)?;
        let own_dir = self.dir_of(path.segments())?;
        let collection_dir = self.dir_of(path.parent().segments())?;
        blocking(move || {
            let existed = match std::fs::remove_file(&file) {
                Ok(()) => true,
                Err(e) if e.kind() == ErrorKind::NotFound => false,
                Err(e) => return Err(io_err(&file, e)),
            };
            // Prune directories left empty; non-empty ones stay.
            let _ = std::fs::remove_dir(&own_dir);
            let _ = std::fs::remove_dir(&collection_dir);
            Ok(existed)
        })
        .await
    }

    async fn list(&self, collection: &CollectionPath, query: &Query) -> Result<Vec<(String, Document)>> {
        let dir = self.dir_of(collection.segments())?;
        let query = query.clone();
        blocking(move || {
            let ids: Vec<String> = entries(&dir)?
                .into_iter()
                .filter(|(_, is_dir)| !is_dir)
                .filter_map(|(name, _)| name.strip_suffix(".json").map(str::to_owned))
                .collect();

            // Id order needs file names only: read just the documents kept.
            if query.order_by.is_none() {
                let ordered = query.order_ids(ids).unwrap_or_default();
                let mut docs = Vec::new();
                for id in ordered {
                    if query.limit.is_some_and(|l| docs.len() >= l) {
                        break;
                    }
                    if let Some(doc) = read_doc(&dir.join(format!("{id}.json")))? {
                        docs.push((id, doc));
                    }
                }
                return Ok(docs);
            }

            let mut docs = Vec::new();
            for id in ids {
                if let Some(doc) = read_doc(&dir.join(format!("{id}.json")))? {
                    docs.push((id, doc));
                }
            }
            Ok(query.apply(docs))
        })
        .await
    }

    async fn document_ids(&self, collection: &CollectionPath) -> Result<Vec<String>> {
        let dir = self.dir_of(collection.segments())?;
        blocking(move || {
            let ids: BTreeSet<String> = entries(&dir)?
                .into_iter()
                .filter_map(|(name, is_dir)| {
                    if is_dir {
                        Some(name)
                    } else {
                        name.strip_suffix(".json").map(str::to_owned)
                    }
                })
                .collect();
            Ok(ids.into_iter().collect())
        })
        .await
    }

    async fn subcollections(&self, path: &DocPath) -> Result<Vec<String>> {
        let dir = self.dir_of(path.segments())?;
        blocking(move || {
            let mut names: Vec<String> = entries(&dir)?
                .into_iter()
                .filter(|(_, is_dir)| *is_dir)
                .map(|(name, _)| name)
                .collect();
            names.sort();
            Ok(names)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn document_lands_as_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::open(tmp.path()).unwrap();
        let path = CollectionPath::root("chats").doc("c1").collection("messages").doc("m1");
        store.set(&path, json!({"prompt": "hi"})).await.unwrap();

        let on_disk = tmp.path().join("chats/c1/messages/m1.json");
        assert!(on_disk.exists());
        assert_eq!(store.get(&path).await.unwrap(), Some(json!({"prompt": "hi"})));
        // Parent "c1" is implicit: a directory without a json file.
        let ids = store.document_ids(&CollectionPath::root("chats")).await.unwrap();
        assert_eq!(ids, vec!["c1"]);
    }

    #[tokio::test]
    async fn traversal_segments_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::open(tmp.path()).unwrap();
        let err = store
            .get(&CollectionPath::root("chats").doc("../etc"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn corrupt_file_is_integrity_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::open(tmp.path()).unwrap();
        std::fs::create_dir_all(tmp.path().join("c")).unwrap();
        std::fs::write(tmp.path().join("c/bad.json"), b"{not json").unwrap();
        let err = store.get(&CollectionPath::root("c").doc("bad")).await.unwrap_err();
        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn delete_prunes_empty_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::open(tmp.path()).unwrap();
        let path = CollectionPath::root("c").doc("d");
        store.set(&path, json!({})).await.unwrap();
        assert!(store.delete(&path).await.unwrap());
        assert!(!store.delete(&path).await.unwrap());
        assert!(!tmp.path().join("c").exists());
    }

    #[tokio::test]
    async fn id_ordered_listing_reads_only_returned_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::open(tmp.path()).unwrap();
        let coll = CollectionPath::root("c");
        store.set(&coll.doc("b"), json!({"n": 2})).await.unwrap();
        store.set(&coll.doc("c"), json!({"n": 3})).await.unwrap();
        // Never reached by a newest-first page of one, so never parsed.
        std::fs::write(tmp.path().join("c/a.json"), b"{not json").unwrap();

        let page = store.list(&coll, &Query::by_id().descending().limit(1)).await.unwrap();
        assert_eq!(page, vec![("c".to_string(), json!({"n": 3}))]);
        let page = store
            .list(&coll, &Query::by_id().descending().before("c").limit(1))
            .await
            .unwrap();
        assert_eq!(page, vec![("b".to_string(), json!({"n": 2}))]);
        assert!(store.list(&coll, &Query::by_id()).await.unwrap_err().is_integrity());
    }

    #[tokio::test]
    async fn temp_files_are_not_listed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::open(tmp.path()).unwrap();
        let coll = CollectionPath::root("c");
        store.set(&coll.doc("a"), json!(1)).await.unwrap();
        std::fs::write(tmp.path().join("c/.a.json.123.tmp"), b"1").unwrap();
        let listed = store.list(&coll, &Query::by_id()).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
