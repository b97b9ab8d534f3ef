//! Hierarchical document storage: collections of JSON documents, where any
//! document may own nested subcollections.
//!
//! Backends implement [`DocumentStore`]; everything above this crate talks
//! to `Arc<dyn DocumentStore>` and never to a concrete backend.

pub mod delete;
pub mod document;
pub mod file;
pub mod memory;
pub mod path;
pub mod timeout;

pub use delete::delete_recursive;
pub use document::{Direction, Document, DocumentStore, Query};
pub use file::FileDocumentStore;
pub use memory::MemoryDocumentStore;
pub use path::{CollectionPath, DocPath};
pub use timeout::TimeoutStore;
