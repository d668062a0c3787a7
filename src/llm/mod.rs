//! Completion and embedding client.
//!
//! This module wraps the external chat-completion and embedding endpoints
//! behind a single non-streaming [`CompletionClient`].
//!
//! # Error surfacing
//!
//! The two operations surface failures differently, by design:
//!
//! - [`CompletionClient::complete`] never fails the caller. Every failure
//!   (missing credential, transport error, provider error payload, malformed
//!   success payload) is rendered as a reply string prefixed with `"Error: "`
//!   and returned as the assistant's turn. The conversation continues.
//! - [`CompletionClient::embed`] returns a tagged [`EmbedError`] so the
//!   context composer can branch and degrade.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeout for completion calls.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for embedding calls.
const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection and model settings for the completion provider.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL for the provider API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key. When absent, calls fail immediately without a
    /// network round trip.
    pub api_key: Option<String>,
    /// Chat model identifier.
    pub model: String,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// System prompt prepended to every conversation.
    pub system_prompt: String,
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

impl MessageRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a stored role string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author.
    pub role: MessageRole,
    /// Free-text content.
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Errors from the embedding operation.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// No API key configured; the call was not attempted.
    #[error("embedding API key is not configured")]
    MissingApiKey,

    /// Transport-level failure (connect, timeout, TLS, ...).
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider returned an error payload.
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// A success payload without the expected embedding field.
    #[error("unexpected response from embedding provider")]
    MalformedResponse,
}

/// Wire message for the completion request body.
#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

/// Request body for `/v1/chat/completions`.
#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

/// Request body for `/v1/embeddings`.
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// Non-streaming client for the chat-completion and embedding endpoints.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl CompletionClient {
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Request a chat completion and return the assistant reply.
    ///
    /// Builds the message list as: one system message (the configured prompt,
    /// with `context_text` appended when non-empty), then either the supplied
    /// `history` verbatim or, when the history is empty, a single user
    /// message carrying `user_message`. History and the single-message
    /// fallback are mutually exclusive, never merged.
    pub async fn complete(
        &self,
        user_message: &str,
        history: &[ChatMessage],
        context_text: &str,
    ) -> String {
        let Some(api_key) = &self.settings.api_key else {
            return "Error: completion API key is not configured.".to_string();
        };

        let body = CompletionRequest {
            model: self.settings.model.clone(),
            messages: build_messages(
                &self.settings.system_prompt,
                user_message,
                history,
                context_text,
            ),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let url = format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .timeout(COMPLETION_TIMEOUT)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(name: "llm.complete.transport_error", error = %e, "Completion request failed");
                return format!("Error: {e}");
            }
        };

        // The provider reports errors in the body, with or without a 2xx
        // status. Parse the body first and branch on its shape.
        let payload: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(name: "llm.complete.bad_payload", error = %e, "Completion response was not JSON");
                return "Error: unexpected response from completion provider.".to_string();
            }
        };

        if let Some(message) = payload["error"]["message"].as_str() {
            tracing::warn!(name: "llm.complete.provider_error", error = %message, "Completion provider returned an error");
            return format!("Error: {message}");
        }

        match payload["choices"][0]["message"]["content"].as_str() {
            Some(content) => content.to_string(),
            None => "Error: unexpected response from completion provider.".to_string(),
        }
    }

    /// Generate a vector embedding for `text`.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let api_key = self
            .settings
            .api_key
            .as_ref()
            .ok_or(EmbedError::MissingApiKey)?;

        let url = format!(
            "{}/v1/embeddings",
            self.settings.base_url.trim_end_matches('/')
        );

        let payload: serde_json::Value = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .timeout(EMBEDDING_TIMEOUT)
            .json(&EmbeddingRequest {
                model: &self.settings.embedding_model,
                input: text,
            })
            .send()
            .await?
            .json()
            .await?;

        if let Some(message) = payload["error"]["message"].as_str() {
            return Err(EmbedError::Provider(message.to_string()));
        }

        let embedding = payload["data"][0]["embedding"]
            .as_array()
            .ok_or(EmbedError::MalformedResponse)?;

        embedding
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or(EmbedError::MalformedResponse)
            })
            .collect()
    }
}

/// Preamble that introduces retrieved context inside the system message.
const CONTEXT_PREAMBLE: &str =
    "\n\nYou have access to the following information that may be relevant to the user's query:\n";

fn build_messages(
    system_prompt: &str,
    user_message: &str,
    history: &[ChatMessage],
    context_text: &str,
) -> Vec<WireMessage> {
    let mut system = system_prompt.to_string();
    if !context_text.is_empty() {
        system.push_str(CONTEXT_PREAMBLE);
        system.push_str(context_text);
    }

    let mut messages = vec![WireMessage {
        role: "system",
        content: system,
    }];

    if history.is_empty() {
        messages.push(WireMessage {
            role: "user",
            content: user_message.to_string(),
        });
    } else {
        messages.extend(history.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: m.content.clone(),
        }));
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> LlmSettings {
        LlmSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: None,
            model: "test-model".to_string(),
            embedding_model: "test-embed".to_string(),
            max_tokens: 100,
            temperature: 0.7,
            system_prompt: "sys".to_string(),
        }
    }

    #[test]
    fn test_build_messages_without_context() {
        let messages = build_messages("You are helpful.", "Hi", &[], "");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "You are helpful.");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "Hi");
    }

    #[test]
    fn test_build_messages_appends_context() {
        let messages = build_messages("You are helpful.", "Hi", &[], "fact one\n\nfact two");
        assert!(messages[0].content.starts_with("You are helpful."));
        assert!(messages[0].content.contains("relevant to the user's query"));
        assert!(messages[0].content.ends_with("fact one\n\nfact two"));
    }

    #[test]
    fn test_build_messages_history_replaces_single_message() {
        let history = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("second"),
        ];
        let messages = build_messages("sys", "ignored", &history, "");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "first");
        assert_eq!(messages[2].role, "assistant");
        // The current user message is never merged into a non-empty history.
        assert!(messages.iter().all(|m| m.content != "ignored"));
    }

    #[tokio::test]
    async fn test_complete_without_api_key_is_immediate() {
        let client = CompletionClient::new(test_settings());
        let reply = client.complete("hello", &[], "").await;
        assert_eq!(reply, "Error: completion API key is not configured.");
    }

    #[tokio::test]
    async fn test_embed_without_api_key() {
        let client = CompletionClient::new(test_settings());
        assert!(matches!(
            client.embed("hello").await,
            Err(EmbedError::MissingApiKey)
        ));
    }
}
