//! Conversation store contract and the in-memory implementation.
//!
//! The core asks very little of a store: append a message, read a
//! conversation back in insertion order. Durability, retention, and deletion
//! policy all belong to the backend. Appends are assumed at-least-once
//! durable once they return; the core never buffers writes and surfaces store
//! failures immediately.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use palaver_types::{ConversationId, Message};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("conversation store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Storage backend for conversation history.
///
/// `load` of an unknown conversation returns an empty history - a
/// conversation exists from its first appended message.
pub trait ConversationStore: Send + Sync {
    /// Reads a conversation's messages in insertion order.
    fn load(
        &self,
        id: ConversationId,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Appends one message to a conversation.
    fn append(
        &self,
        id: ConversationId,
        message: Message,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Ephemeral in-process store for tests and embedders that manage their own
/// persistence.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<ConversationId, Vec<Message>>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for MemoryStore {
    async fn load(&self, id: ConversationId) -> Result<Vec<Message>, StoreError> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(&id).cloned().unwrap_or_default())
    }

    async fn append(&self, id: ConversationId, message: Message) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entry(id).or_default().push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::{ConversationStore, MemoryStore};
    use palaver_types::{ConversationId, Message, NonEmptyString, Seq};

    fn user(content: &str, seq: u64) -> Message {
        Message::user(
            NonEmptyString::new(content).expect("non-empty test content"),
            Seq::new(seq),
            SystemTime::now(),
        )
    }

    #[tokio::test]
    async fn load_of_unknown_conversation_is_empty() {
        let store = MemoryStore::new();
        let history = store.load(ConversationId::random()).await.expect("load");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn append_preserves_insertion_order() {
        let store = MemoryStore::new();
        let id = ConversationId::random();
        store.append(id, user("first", 0)).await.expect("append");
        store.append(id, user("second", 1)).await.expect("append");
        store.append(id, user("third", 2)).await.expect("append");

        let history = store.load(id).await.expect("load");
        let contents: Vec<&str> = history.iter().map(Message::content).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let store = MemoryStore::new();
        let a = ConversationId::random();
        let b = ConversationId::random();
        store.append(a, user("for a", 0)).await.expect("append");

        assert_eq!(store.load(a).await.expect("load").len(), 1);
        assert!(store.load(b).await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStore::new();
        let id = ConversationId::random();
        let clone = store.clone();
        store.append(id, user("shared", 0)).await.expect("append");

        assert_eq!(clone.load(id).await.expect("load").len(), 1);
    }
}
