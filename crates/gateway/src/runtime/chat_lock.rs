//! Per-chat single-writer control.
//!
//! Checkpoints and messages of one chat assume a single writer, so only
//! one generation runs per chat at a time. A second request arriving
//! while one is in flight is rejected as busy rather than queued.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Manages per-chat run locks.
///
/// Each chat id maps to a `Semaphore(1)`. Holding the permit grants
/// exclusive write access for one request; it releases on drop.
pub struct ChatLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for ChatLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Take the run lock for `chat_id` without waiting.
    pub fn try_acquire(&self, chat_id: &str) -> Result<OwnedSemaphorePermit, ChatBusy> {
        let sem = {
            let mut locks = self.locks.lock();
            // Drop idle entries so the map tracks only live chats.
            locks.retain(|id, sem| id == chat_id || sem.available_permits() == 0);
            locks
                .entry(chat_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.try_acquire_owned().map_err(|_| ChatBusy)
    }

    /// Whether a request currently holds `chat_id`.
    pub fn is_busy(&self, chat_id: &str) -> bool {
        self.locks
            .lock()
            .get(chat_id)
            .is_some_and(|sem| sem.available_permits() == 0)
    }

    /// Number of tracked chats (for monitoring).
    pub fn chat_count(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Error returned when a chat already has a generation in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatBusy;

impl std::fmt::Display for ChatBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a generation is already running for this chat")
    }
}

impl std::error::Error for ChatBusy {}
