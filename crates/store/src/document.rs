use std::cmp::Ordering;

use ny_domain::error::Result;
use serde_json::Value;

use crate::path::{CollectionPath, DocPath};

pub type Document = Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// Ordered listing of one collection.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Top-level field to order by; `None` orders by document id.
    pub order_by: Option<String>,
    pub direction: Direction,
    /// Only documents whose id sorts strictly before this one.
    pub before: Option<String>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn by_id() -> Self {
        Self::default()
    }

    pub fn by_field(field: impl Into<String>) -> Self {
        Self { order_by: Some(field.into()), ..Self::default() }
    }

    pub fn descending(mut self) -> Self {
        self.direction = Direction::Descending;
        self
    }

    pub fn before(mut self, id: impl Into<String>) -> Self {
        self.before = Some(id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// For id-ordered queries, the ids to read in result order (bound and
    /// direction applied, not truncated). `None` when the order depends on
    /// document contents.
    pub fn order_ids(&self, mut ids: Vec<String>) -> Option<Vec<String>> {
        if self.order_by.is_some() {
            return None;
        }
        if let Some(bound) = &self.before {
            ids.retain(|id| id.as_str() < bound.as_str());
        }
        ids.sort();
        if self.direction == Direction::Descending {
            ids.reverse();
        }
        Some(ids)
    }

    /// Filter, sort and truncate an unordered collection snapshot.
    /// Shared by backends that have no native ordering.
    pub fn apply(&self, mut docs: Vec<(String, Document)>) -> Vec<(String, Document)> {
        if let Some(bound) = &self.before {
            docs.retain(|(id, _)| id.as_str() < bound.as_str());
        }
        match &self.order_by {
            None => docs.sort_by(|a, b| a.0.cmp(&b.0)),
            Some(field) => docs.sort_by(|a, b| {
                compare_values(a.1.get(field), b.1.get(field)).then_with(|| a.0.cmp(&b.0))
            }),
        }
        if self.direction == Direction::Descending {
            docs.reverse();
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

/// Missing and null sort first, then booleans, numbers, strings; anything
/// else compares by its JSON text.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a)
            .cmp(&rank(b))
            .then_with(|| a.map(Value::to_string).cmp(&b.map(Value::to_string))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A hierarchical document database.
///
/// Every call is a single, independent operation; there are no
/// transactions. A document may exist only implicitly, as the parent of a
/// subcollection that holds data.
///
/// Backend failures surface as `Error::Store`/`Error::Timeout` and are
/// never retried here.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>>;

    /// Create or replace a document.
    async fn set(&self, path: &DocPath, doc: Document) -> Result<()>;

    /// Create a document only if absent. Returns whether it was created.
    async fn create(&self, path: &DocPath, doc: Document) -> Result<bool>;

    /// Remove a document (not its subcollections). Returns whether it existed.
    async fn delete(&self, path: &DocPath) -> Result<bool>;

    /// Documents with data in `collection`, ordered per `query`.
    async fn list(&self, collection: &CollectionPath, query: &Query) -> Result<Vec<(String, Document)>>;

    /// Ids of every document in `collection`, including implicit parents.
    async fn document_ids(&self, collection: &CollectionPath) -> Result<Vec<String>>;

    /// Names of the subcollections directly under `path`.
    async fn subcollections(&self, path: &DocPath) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<(String, Document)> {
        vec![
            ("b".into(), json!({"n": 2})),
            ("a".into(), json!({"n": 3})),
            ("c".into(), json!({"n": 1})),
            ("d".into(), json!({})),
        ]
    }

    fn ids(v: Vec<(String, Document)>) -> Vec<String> {
        v.into_iter().map(|(id, _)| id).collect()
    }

    #[test]
    fn orders_by_id_descending_with_bound() {
        let q = Query::by_id().descending().before("d").limit(2);
        assert_eq!(ids(q.apply(docs())), vec!["c", "b"]);
    }

    #[test]
    fn id_order_is_resolved_without_documents() {
        let q = Query::by_id().descending().before("d");
        let ids = vec!["b".to_string(), "d".into(), "a".into(), "c".into()];
        assert_eq!(q.order_ids(ids.clone()), Some(vec!["c".into(), "b".into(), "a".into()]));
        assert_eq!(Query::by_field("n").order_ids(ids), None);
    }

    #[test]
    fn orders_by_field_missing_first() {
        let q = Query::by_field("n");
        assert_eq!(ids(q.apply(docs())), vec!["d", "c", "b", "a"]);
    }
}
