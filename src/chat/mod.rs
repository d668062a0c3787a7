//! Request orchestration.
//!
//! [`ChatService`] composes the rate limiter, context composer, completion
//! client, conversation store, and upload staging into the two user-facing
//! flows: a chat turn and a document-analysis turn. A turn moves through
//! admission, optional context retrieval, completion, and optional
//! persistence; rate denial short-circuits before any provider call.
//!
//! Provider failures do not fail a turn: the completion client renders them
//! as `"Error: ..."` reply text, which rides back to the caller as a normal
//! assistant reply and, for authenticated callers, is persisted like any
//! other assistant message.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use uuid::Uuid;

use crate::extract::{ExtractError, TextExtractor};
use crate::llm::{ChatMessage, CompletionClient, MessageRole};
use crate::persistence::{ConversationStore, ConversationSummary};
use crate::rate_limit::{Admission, FixedWindowLimiter};
use crate::retrieval::ContextComposer;
use crate::staging::{PendingUpload, UploadStaging};

/// Upper bound on document text forwarded to the completion provider.
const MAX_DOCUMENT_CHARS: usize = 8000;

/// Marker appended when document text is cut at [`MAX_DOCUMENT_CHARS`].
const TRUNCATION_MARKER: &str = "... [content truncated due to length]";

/// The caller's identity as resolved by the host.
///
/// `user_id` is present for authenticated callers and owns any persisted
/// conversations; the session token is client-generated and stable for the
/// browser session. Rate limiting partitions on the user id when present,
/// else on the session token.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Option<String>,
    pub session: String,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: Option<String>, session: impl Into<String>) -> Self {
        Self {
            user_id,
            session: session.into(),
        }
    }

    #[must_use]
    pub fn rate_key(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.session)
    }
}

/// Terminal failures of a turn. Provider errors are absent on purpose:
/// they surface as reply text, not as errors.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },

    #[error("file not found or expired")]
    UploadNotFound,

    #[error("failed to extract text: {0}")]
    Extraction(#[from] ExtractError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Orchestrates a request from admission to response.
#[derive(Debug, Clone)]
pub struct ChatService {
    completion: Arc<CompletionClient>,
    composer: ContextComposer,
    store: Arc<dyn ConversationStore>,
    staging: UploadStaging,
    limiter: Arc<FixedWindowLimiter>,
    extractor: Arc<dyn TextExtractor>,
    upload_dir: PathBuf,
}

impl ChatService {
    #[must_use]
    pub fn new(
        completion: Arc<CompletionClient>,
        composer: ContextComposer,
        store: Arc<dyn ConversationStore>,
        staging: UploadStaging,
        limiter: Arc<FixedWindowLimiter>,
        extractor: Arc<dyn TextExtractor>,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            completion,
            composer,
            store,
            staging,
            limiter,
            extractor,
            upload_dir,
        }
    }

    /// Run one chat turn: admission, context retrieval, completion, and
    /// (for authenticated callers) persistence of both sides of the turn.
    pub async fn chat_turn(
        &self,
        identity: &Identity,
        message: &str,
        history: &[ChatMessage],
    ) -> Result<String, TurnError> {
        let message = message.trim();

        if let Admission::Denied { retry_after } = self.limiter.admit(identity.rate_key()) {
            tracing::info!(
                name: "chat.rate_limited",
                key = %identity.rate_key(),
                retry_after_secs = retry_after.as_secs(),
                "Chat turn denied by rate limiter"
            );
            return Err(TurnError::RateLimited { retry_after });
        }

        let context = self.composer.retrieve_context(message).await;
        tracing::debug!(
            name: "chat.context_retrieved",
            context_length = context.len(),
            "Context retrieval finished"
        );

        let reply = self.completion.complete(message, history, &context).await;

        self.persist_turn(identity, message, &reply).await?;
        Ok(reply)
    }

    /// Run one document-analysis turn against a staged upload.
    ///
    /// The handle is consumed before extraction, so a second call with the
    /// same handle fails with [`TurnError::UploadNotFound`] regardless of
    /// the outcome here. Context retrieval is skipped for document turns.
    pub async fn document_turn(
        &self,
        identity: &Identity,
        file_handle: &str,
    ) -> Result<String, TurnError> {
        if let Admission::Denied { retry_after } = self.limiter.admit(identity.rate_key()) {
            return Err(TurnError::RateLimited { retry_after });
        }

        let upload = self
            .staging
            .consume(file_handle)
            .ok_or(TurnError::UploadNotFound)?;

        let bytes = tokio::fs::read(&upload.path)
            .await
            .map_err(ExtractError::Io)?;

        // Extraction can be CPU-heavy (PDF parsing); keep it off the
        // request threads.
        let extractor = Arc::clone(&self.extractor);
        let mime_type = upload.mime_type.clone();
        let text = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &mime_type))
            .await
            .context("extraction task panicked")??;

        tracing::info!(
            name: "chat.document_extracted",
            filename = %upload.filename,
            text_length = text.len(),
            "Document text extracted"
        );

        let prompt = analysis_prompt(&upload.filename, &text);
        let reply = self.completion.complete(&prompt, &[], "").await;

        let stored_user_message = format!("I've uploaded a file: {}", upload.filename);
        self.persist_turn(identity, &stored_user_message, &reply)
            .await?;
        Ok(reply)
    }

    /// Write the uploaded bytes to disk and stage them for processing.
    /// Returns the opaque file handle.
    pub async fn stage_upload(
        &self,
        filename: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .context("failed to create upload directory")?;

        let disk_name = format!("{}-{}", Uuid::new_v4().simple(), sanitize_filename(filename));
        let path = self.upload_dir.join(disk_name);

        tokio::fs::write(&path, bytes)
            .await
            .context("failed to store uploaded file")?;

        let handle = self.staging.stage(PendingUpload {
            path,
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
        });

        tracing::info!(
            name: "chat.upload_staged",
            filename = %filename,
            size = bytes.len(),
            "Upload staged"
        );
        Ok(handle)
    }

    /// Replace a conversation's messages with a client-submitted snapshot.
    pub async fn save_history(
        &self,
        owner: &str,
        session: &str,
        history: &[ChatMessage],
    ) -> anyhow::Result<()> {
        let conversation_id = self.store.get_or_create(owner, session).await?;
        self.store.replace_all(conversation_id, history).await
    }

    /// Messages of the (owner, session) conversation; empty when none exists.
    pub async fn history(&self, owner: &str, session: &str) -> anyhow::Result<Vec<ChatMessage>> {
        match self.store.find(owner, session).await? {
            Some(conversation_id) => self.store.list_messages(conversation_id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Summaries of the owner's conversations, newest first.
    pub async fn conversations(&self, owner: &str) -> anyhow::Result<Vec<ConversationSummary>> {
        self.store.list_conversations(owner).await
    }

    /// Messages of one conversation, ownership-checked.
    pub async fn conversation(
        &self,
        owner: &str,
        conversation_id: i64,
    ) -> anyhow::Result<Option<Vec<ChatMessage>>> {
        self.store.get_by_id(owner, conversation_id).await
    }

    /// Drop elapsed rate windows and expired upload handles. Both are only
    /// reclaimed lazily on access otherwise, so the server calls this on a
    /// periodic sweep to keep the maps bounded.
    pub fn purge_ephemeral(&self) {
        let windows = self.limiter.purge_elapsed();
        let uploads = self.staging.purge_expired();
        if windows > 0 || uploads > 0 {
            tracing::debug!(
                name: "chat.ephemeral_purged",
                windows,
                uploads,
                "Dropped expired ephemeral state"
            );
        }
    }

    /// Append both sides of a turn for authenticated callers, user message
    /// first. Error-text replies are stored like any other assistant
    /// message. Anonymous turns are not persisted.
    async fn persist_turn(
        &self,
        identity: &Identity,
        user_message: &str,
        reply: &str,
    ) -> anyhow::Result<()> {
        let Some(owner) = &identity.user_id else {
            return Ok(());
        };

        let conversation_id = self.store.get_or_create(owner, &identity.session).await?;
        self.store
            .append(conversation_id, MessageRole::User, user_message)
            .await?;
        self.store
            .append(conversation_id, MessageRole::Assistant, reply)
            .await?;
        Ok(())
    }
}

/// Build the document-analysis prompt, truncating the text to
/// [`MAX_DOCUMENT_CHARS`] characters.
fn analysis_prompt(filename: &str, text: &str) -> String {
    let mut body: String = text.chars().take(MAX_DOCUMENT_CHARS).collect();
    if text.chars().nth(MAX_DOCUMENT_CHARS).is_some() {
        body.push_str(TRUNCATION_MARKER);
    }

    format!(
        "I've uploaded a document named \"{filename}\". Here's the content:\n\n{body}\n\nPlease analyze this document and provide a summary of its key points."
    )
}

/// Keep only the final path component and replace separators, so a crafted
/// filename cannot escape the upload directory.
fn sanitize_filename(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();
    if name.is_empty() {
        "upload".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_prompt_short_document() {
        let prompt = analysis_prompt("notes.txt", "short content");
        assert!(prompt.starts_with("I've uploaded a document named \"notes.txt\"."));
        assert!(prompt.contains("short content"));
        assert!(!prompt.contains("[content truncated due to length]"));
        assert!(prompt.ends_with("provide a summary of its key points."));
    }

    #[test]
    fn test_analysis_prompt_truncates_long_document() {
        let text = "x".repeat(MAX_DOCUMENT_CHARS + 100);
        let prompt = analysis_prompt("big.pdf", &text);
        assert!(prompt.contains(TRUNCATION_MARKER));
        // The body is cut at the limit, not at the original length.
        assert!(!prompt.contains(&"x".repeat(MAX_DOCUMENT_CHARS + 1)));
    }

    #[test]
    fn test_analysis_prompt_exact_length_is_not_truncated() {
        let text = "y".repeat(MAX_DOCUMENT_CHARS);
        let prompt = analysis_prompt("doc.txt", &text);
        assert!(!prompt.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn test_sanitize_filename_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("notes.txt"), "notes.txt");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn test_identity_rate_key_prefers_user_id() {
        let authed = Identity::new(Some("user-7".to_string()), "sess-1");
        assert_eq!(authed.rate_key(), "user-7");

        let anon = Identity::new(None, "sess-1");
        assert_eq!(anon.rate_key(), "sess-1");
    }
}
