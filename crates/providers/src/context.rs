//! Conversation contexts kept warm between requests.
//!
//! A context is the list of chat turns sent upstream ahead of a new prompt.
//! On a miss it is rebuilt from the stored messages of the chat.

use std::sync::Arc;

use ny_domain::error::Result;
use ny_domain::message::Message;
use ny_domain::tool::ChatMessage;
use ny_domain::trace::TraceEvent;
use ny_messages::MessageStore;

use crate::cache::BoundedCache;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub model: String,
    pub user: String,
    pub chat: String,
}

impl ContextKey {
    pub fn new(model: &str, user: &str, chat: &str) -> Self {
        Self { model: model.to_owned(), user: user.to_owned(), chat: chat.to_owned() }
    }
}

#[derive(Clone)]
pub struct ContextCache {
    cache: Arc<BoundedCache<ContextKey, Arc<Vec<ChatMessage>>>>,
    messages: MessageStore,
}

impl ContextCache {
    pub fn new(capacity: usize, messages: MessageStore) -> Self {
        Self { cache: Arc::new(BoundedCache::new(capacity)), messages }
    }

    /// The turns for `key`, rebuilt from the last `history_limit` stored
    /// messages when not cached.
    pub async fn load(&self, key: &ContextKey, history_limit: usize) -> Result<Vec<ChatMessage>> {
        if let Some(turns) = self.cache.get(key) {
            return Ok(turns.as_ref().clone());
        }
        let history = self.messages.history(&key.chat, history_limit).await?;
        tracing::debug!(model = %key.model, chat_id = %key.chat, messages = history.len(), "context rebuilt");
        Ok(history_to_turns(&history))
    }

    /// Remember `turns` for `key`, keeping at most `max_turns` of them.
    pub fn store(&self, key: ContextKey, mut turns: Vec<ChatMessage>, max_turns: usize) {
        if turns.len() > max_turns {
            turns.drain(..turns.len() - max_turns);
        }
        if let Some((evicted, _)) = self.cache.insert(key, Arc::new(turns)) {
            TraceEvent::ContextCacheEvicted { model: evicted.model, chat_id: evicted.chat }.emit();
        }
    }

    /// Drop every cached context of `chat_id`.
    pub fn forget_chat(&self, chat_id: &str) -> usize {
        self.cache.retain_keys(|k| k.chat != chat_id)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// One user turn per prompt, one assistant turn per non-empty answer.
pub fn history_to_turns(history: &[Message]) -> Vec<ChatMessage> {
    let mut turns = Vec::with_capacity(history.len() * 2);
    for msg in history {
        turns.push(ChatMessage::user(msg.prompt.clone()));
        let answer = msg.answer_text();
        if !answer.is_empty() {
            turns.push(ChatMessage::assistant(answer));
        }
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use ny_domain::message::AnswerSegment;
    use ny_store::MemoryDocumentStore;
    use serde_json::json;

    fn answered(id: &str, prompt: &str, answer: &str) -> Message {
        let mut msg = Message::new(id, "c1", prompt);
        msg.answer.push(AnswerSegment { id: None, kind: "text".into(), data: json!(answer) });
        msg
    }

    #[tokio::test]
    async fn miss_rebuilds_from_history_then_hits() {
        let store = MessageStore::new(Arc::new(MemoryDocumentStore::new()));
        store.save(&answered("m1", "hi", "Hello!")).await.unwrap();
        let contexts = ContextCache::new(4, store.clone());
        let key = ContextKey::new("noney-chat", "u1", "c1");

        let turns = contexts.load(&key, 10).await.unwrap();
        assert_eq!(turns, vec![ChatMessage::user("hi"), ChatMessage::assistant("Hello!")]);

        let mut extended = turns.clone();
        extended.push(ChatMessage::user("again"));
        contexts.store(key.clone(), extended.clone(), 100);
        // Served from cache now, not from the store.
        store.delete_chat("c1").await.unwrap();
        assert_eq!(contexts.load(&key, 10).await.unwrap(), extended);
    }

    #[test]
    fn store_trims_oldest_turns() {
        let contexts = ContextCache::new(2, MessageStore::new(Arc::new(MemoryDocumentStore::new())));
        let key = ContextKey::new("m", "u", "c");
        let turns = (0..5).map(|i| ChatMessage::user(format!("t{i}"))).collect();
        contexts.store(key.clone(), turns, 2);
        let kept = contexts.cache.get(&key).unwrap();
        assert_eq!(kept.as_ref(), &vec![ChatMessage::user("t3"), ChatMessage::user("t4")]);
    }

    #[test]
    fn forget_chat_drops_all_models_and_users() {
        let contexts = ContextCache::new(8, MessageStore::new(Arc::new(MemoryDocumentStore::new())));
        contexts.store(ContextKey::new("a", "u1", "c1"), Vec::new(), 10);
        contexts.store(ContextKey::new("b", "u2", "c1"), Vec::new(), 10);
        contexts.store(ContextKey::new("a", "u1", "c2"), Vec::new(), 10);
        assert_eq!(contexts.forget_chat("c1"), 2);
        assert_eq!(contexts.len(), 1);
    }
}
