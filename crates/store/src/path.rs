use std::fmt;

/// Address of a collection: an odd number of segments
/// (`chats`, `chats/{id}/messages`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionPath {
    segments: Vec<String>,
}

/// Address of a document: an even number of segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocPath {
    segments: Vec<String>,
}

impl CollectionPath {
    pub fn root(name: impl Into<String>) -> Self {
        Self { segments: vec![name.into()] }
    }

    pub fn doc(&self, id: impl Into<String>) -> DocPath {
        let mut segments = self.segments.clone();
        segments.push(id.into());
        DocPath { segments }
    }

    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The document owning this collection, `None` for a root collection.
    pub fn parent(&self) -> Option<DocPath> {
        if self.segments.len() < 3 {
            return None;
        }
        Some(DocPath { segments: self.segments[..self.segments.len() - 1].to_vec() })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl DocPath {
    pub fn collection(&self, name: impl Into<String>) -> CollectionPath {
        let mut segments = self.segments.clone();
        segments.push(name.into());
        CollectionPath { segments }
    }

    pub fn id(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    pub fn parent(&self) -> CollectionPath {
        CollectionPath { segments: self.segments[..self.segments.len() - 1].to_vec() }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}
