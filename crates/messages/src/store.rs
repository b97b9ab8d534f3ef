use std::sync::Arc;

use ny_domain::error::{Error, Result};
use ny_domain::message::Message;
use ny_store::{delete_recursive, CollectionPath, DocPath, DocumentStore, Query};
use serde_json::Value;

/// Sort key written next to each message; RFC 3339 strings with varying
/// sub-second precision do not sort lexicographically.
const ORDER_FIELD: &str = "created_at_ms";

fn chat_doc(chat_id: &str) -> DocPath {
    CollectionPath::root("chats").doc(chat_id)
}

fn messages(chat_id: &str) -> CollectionPath {
    chat_doc(chat_id).collection("messages")
}

/// Messages stored at `chats/{chat_id}/messages/{message_id}`, one
/// document per message.
#[derive(Clone)]
pub struct MessageStore {
    docs: Arc<dyn DocumentStore>,
}

impl MessageStore {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    pub async fn get(&self, chat_id: &str, message_id: &str) -> Result<Option<Message>> {
        match self.docs.get(&messages(chat_id).doc(message_id)).await? {
            None => Ok(None),
            Some(doc) => decode(doc).map(Some),
        }
    }

    /// Write the whole message in one document replace.
    pub async fn save(&self, message: &Message) -> Result<()> {
        let mut doc =
            serde_json::to_value(message).map_err(|e| Error::Serialization(e.to_string()))?;
        if let Value::Object(map) = &mut doc {
            map.insert(ORDER_FIELD.into(), Value::from(message.created_at.timestamp_millis()));
        }
        self.docs
            .set(&messages(&message.chat_id).doc(message.id.clone()), doc)
            .await
    }

    /// The most recent `limit` messages of a chat, oldest first.
    pub async fn history(&self, chat_id: &str, limit: usize) -> Result<Vec<Message>> {
        let query = Query::by_field(ORDER_FIELD).descending().limit(limit);
        let mut out = self
            .docs
            .list(&messages(chat_id), &query)
            .await?
            .into_iter()
            .map(|(_, doc)| decode(doc))
            .collect::<Result<Vec<_>>>()?;
        out.reverse();
        Ok(out)
    }

    /// Remove a chat and all of its messages. Returns documents removed.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<usize> {
        let removed = delete_recursive(self.docs.as_ref(), &chat_doc(chat_id)).await?;
        tracing::info!(chat_id, removed, "chat deleted");
        Ok(removed)
    }
}

fn decode(doc: Value) -> Result<Message> {
    serde_json::from_value(doc).map_err(|e| Error::Integrity(format!("malformed message: {e}")))
}
