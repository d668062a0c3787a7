//! In-memory conversation store.
//!
//! Mirrors the Postgres provider's semantics (get-or-create uniqueness,
//! insertion-ordered messages, snapshot replace, ownership-checked reads)
//! without a database. Used in tests and DB-less deployments; state does
//! not survive a restart.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::llm::{ChatMessage, MessageRole};
use crate::persistence::{ConversationStore, ConversationSummary, preview};

#[derive(Debug)]
struct ConversationRec {
    id: i64,
    updated_at: DateTime<Utc>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    /// Keyed by (owner, session); at most one conversation per pair.
    by_pair: HashMap<(String, String), i64>,
    /// Keyed by conversation id, with the owner alongside for access checks.
    conversations: HashMap<i64, (String, ConversationRec)>,
}

/// Mutex-backed conversation store. The single lock also serializes writes
/// to any one conversation, matching the transactional Postgres provider.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conversations held. Test inspection hook.
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.inner.lock().unwrap().conversations.len()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_or_create(&self, owner: &str, session: &str) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let key = (owner.to_string(), session.to_string());

        if let Some(id) = inner.by_pair.get(&key) {
            return Ok(*id);
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.by_pair.insert(key, id);
        inner.conversations.insert(
            id,
            (
                owner.to_string(),
                ConversationRec {
                    id,
                    updated_at: Utc::now(),
                    messages: Vec::new(),
                },
            ),
        );
        Ok(id)
    }

    async fn find(&self, owner: &str, session: &str) -> Result<Option<i64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .by_pair
            .get(&(owner.to_string(), session.to_string()))
            .copied())
    }

    async fn append(&self, conversation_id: i64, role: MessageRole, content: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let (_, rec) = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| anyhow::anyhow!("unknown conversation: {conversation_id}"))?;

        rec.messages.push(ChatMessage {
            role,
            content: content.to_string(),
        });
        rec.updated_at = Utc::now();
        Ok(())
    }

    async fn replace_all(&self, conversation_id: i64, messages: &[ChatMessage]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let (_, rec) = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| anyhow::anyhow!("unknown conversation: {conversation_id}"))?;

        rec.messages = messages.to_vec();
        rec.updated_at = Utc::now();
        Ok(())
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<ChatMessage>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .conversations
            .get(&conversation_id)
            .map(|(_, rec)| rec.messages.clone())
            .unwrap_or_default())
    }

    async fn list_conversations(&self, owner: &str) -> Result<Vec<ConversationSummary>> {
        let inner = self.inner.lock().unwrap();

        let mut entries: Vec<(DateTime<Utc>, ConversationSummary)> = inner
            .conversations
            .values()
            .filter(|(o, _)| o == owner)
            .filter_map(|(_, rec)| {
                // Conversations without a user-authored message are skipped,
                // matching the inner join in the SQL provider.
                let first_user = rec.messages.iter().find(|m| m.role == MessageRole::User)?;
                Some((
                    rec.updated_at,
                    ConversationSummary {
                        id: rec.id,
                        updated_at: rec.updated_at.to_rfc3339(),
                        preview: preview(&first_user.content),
                    },
                ))
            })
            .collect();

        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, s)| s).collect())
    }

    async fn get_by_id(
        &self,
        owner: &str,
        conversation_id: i64,
    ) -> Result<Option<Vec<ChatMessage>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .conversations
            .get(&conversation_id)
            .filter(|(o, _)| o == owner)
            .map(|(_, rec)| rec.messages.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = MemoryStore::new();

        let first = store.get_or_create("alice", "session-1").await.unwrap();
        let second = store.get_or_create("alice", "session-1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.conversation_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_pairs_get_distinct_conversations() {
        let store = MemoryStore::new();

        let a = store.get_or_create("alice", "s1").await.unwrap();
        let b = store.get_or_create("alice", "s2").await.unwrap();
        let c = store.get_or_create("bob", "s1").await.unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.conversation_count(), 3);
    }

    #[tokio::test]
    async fn test_append_preserves_insertion_order() {
        let store = MemoryStore::new();
        let id = store.get_or_create("alice", "s").await.unwrap();

        store.append(id, MessageRole::User, "question").await.unwrap();
        store
            .append(id, MessageRole::Assistant, "answer")
            .await
            .unwrap();

        let messages = store.list_messages(id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_replace_all_round_trip() {
        let store = MemoryStore::new();
        let id = store.get_or_create("alice", "s").await.unwrap();

        store.append(id, MessageRole::User, "one").await.unwrap();
        store.append(id, MessageRole::Assistant, "two").await.unwrap();

        let snapshot = vec![ChatMessage::user("only message")];
        store.replace_all(id, &snapshot).await.unwrap();

        let messages = store.list_messages(id).await.unwrap();
        assert_eq!(messages, snapshot);
    }

    #[tokio::test]
    async fn test_list_conversations_previews_first_user_message() {
        let store = MemoryStore::new();
        let id = store.get_or_create("alice", "s").await.unwrap();

        store
            .append(id, MessageRole::User, "what is the answer to everything")
            .await
            .unwrap();
        store.append(id, MessageRole::Assistant, "42").await.unwrap();
        store
            .append(id, MessageRole::User, "are you sure")
            .await
            .unwrap();

        let summaries = store.list_conversations("alice").await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].preview, "what is the answer to everything");

        // Other owners see nothing.
        assert!(store.list_conversations("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_by_id_enforces_ownership() {
        let store = MemoryStore::new();
        let id = store.get_or_create("alice", "s").await.unwrap();
        store.append(id, MessageRole::User, "private").await.unwrap();

        assert!(store.get_by_id("alice", id).await.unwrap().is_some());
        assert!(store.get_by_id("bob", id).await.unwrap().is_none());
        assert!(store.get_by_id("alice", 999).await.unwrap().is_none());
    }
}
