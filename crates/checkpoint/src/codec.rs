use ny_domain::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag stored next to every blob value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Json,
    /// The channel is versioned in the checkpoint but holds no value.
    Empty,
}

/// Encode a record for storage. Failure aborts the request.
pub fn to_document<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a stored record. A stored document that no longer matches its
/// schema is an integrity problem, not a transient one.
pub fn from_document<T: DeserializeOwned>(what: &str, doc: Value) -> Result<T> {
    serde_json::from_value(doc).map_err(|e| Error::Integrity(format!("malformed {what}: {e}")))
}
