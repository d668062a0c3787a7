//! Durable conversation store.
//!
//! Conversations are append-only message logs keyed by an (owner, session)
//! pair; at most one conversation exists per pair and repeated access
//! returns the existing one. Messages keep insertion order (ascending
//! surrogate key) and are never reordered.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::llm::{ChatMessage, MessageRole};

pub mod providers;

/// Number of words kept in a conversation preview.
const PREVIEW_WORDS: usize = 10;

/// Listing entry for one conversation, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: i64,
    /// Last-updated time, RFC 3339.
    pub updated_at: String,
    /// First user-authored message, truncated to a few words.
    pub preview: String,
}

#[async_trait]
pub trait ConversationStore: Send + Sync + std::fmt::Debug {
    /// Return the conversation id for (owner, session), creating the
    /// conversation if it does not exist. Idempotent.
    async fn get_or_create(&self, owner: &str, session: &str) -> Result<i64>;

    /// Look up the conversation id for (owner, session) without creating.
    async fn find(&self, owner: &str, session: &str) -> Result<Option<i64>>;

    /// Append one message and bump the conversation's updated time.
    async fn append(&self, conversation_id: i64, role: MessageRole, content: &str) -> Result<()>;

    /// Replace the conversation's messages with a full snapshot: all prior
    /// messages are deleted, the snapshot is inserted in submitted order,
    /// and the conversation's updated time is bumped. Atomic.
    async fn replace_all(&self, conversation_id: i64, messages: &[ChatMessage]) -> Result<()>;

    /// All messages of a conversation, in insertion order.
    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<ChatMessage>>;

    /// Summaries of the owner's conversations, newest first.
    async fn list_conversations(&self, owner: &str) -> Result<Vec<ConversationSummary>>;

    /// Messages of a conversation, only if it belongs to `owner`. The
    /// ownership check is part of the read: a foreign id yields `None`,
    /// indistinguishable from a missing one.
    async fn get_by_id(&self, owner: &str, conversation_id: i64)
    -> Result<Option<Vec<ChatMessage>>>;
}

/// Truncate `content` to at most `PREVIEW_WORDS` words, appending an
/// ellipsis when trimmed.
#[must_use]
pub fn preview(content: &str) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.len() <= PREVIEW_WORDS {
        words.join(" ")
    } else {
        format!("{}...", words[..PREVIEW_WORDS].join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_short_content_untouched() {
        assert_eq!(preview("hello world"), "hello world");
    }

    #[test]
    fn test_preview_truncates_to_ten_words() {
        let content = "one two three four five six seven eight nine ten eleven twelve";
        assert_eq!(
            preview(content),
            "one two three four five six seven eight nine ten..."
        );
    }

    #[test]
    fn test_preview_collapses_whitespace() {
        assert_eq!(preview("  spaced \n out  "), "spaced out");
    }
}
