//! Vector retrieval and context composition.
//!
//! [`VectorSearchClient`] is a thin request/response wrapper around the
//! external nearest-neighbor search provider. [`ContextComposer`] chains the
//! embedding client and the vector client to turn a raw query into a context
//! block for the system prompt; it never fails the caller and degrades to an
//! empty string instead.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::llm::CompletionClient;

/// Number of nearest neighbors requested per query.
const TOP_K: usize = 5;

/// Timeout for vector search calls.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the vector search provider.
#[derive(Debug, Clone)]
pub struct VectorSettings {
    /// Base URL of the provider API.
    pub base_url: String,
    /// Optional API key. When absent, queries fail without a network call.
    pub api_key: Option<String>,
    /// Name of the index to search.
    pub index: String,
}

/// Errors from the vector search provider.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// No API key configured; the call was not attempted.
    #[error("vector search API key is not configured")]
    MissingApiKey,

    /// Transport-level failure.
    #[error("vector search request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider returned an error payload.
    #[error("vector search provider error: {0}")]
    Provider(String),

    /// A success payload without the expected matches field.
    #[error("unexpected response from vector search provider")]
    MalformedResponse,
}

/// A ranked match returned by the provider.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    /// Similarity score as reported by the provider.
    pub score: Option<f32>,
    /// Provider metadata attached to the match.
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

/// Request/response wrapper around the nearest-neighbor search endpoint.
///
/// Single attempt, no caching, no retry; errors propagate as tagged results.
#[derive(Debug, Clone)]
pub struct VectorSearchClient {
    http: reqwest::Client,
    settings: VectorSettings,
}

impl VectorSearchClient {
    #[must_use]
    pub fn new(settings: VectorSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Query the configured index for the `top_k` nearest neighbors.
    pub async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, RetrievalError> {
        let api_key = self
            .settings
            .api_key
            .as_ref()
            .ok_or(RetrievalError::MissingApiKey)?;

        let url = format!(
            "{}/v1/indexes/{}/query",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.index
        );

        let payload: serde_json::Value = self
            .http
            .post(&url)
            .header("Api-Key", api_key)
            .timeout(QUERY_TIMEOUT)
            .json(&QueryRequest {
                vector,
                top_k,
                include_metadata: true,
            })
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = payload.get("error") {
            return Err(RetrievalError::Provider(error.to_string()));
        }

        let matches = payload["matches"]
            .as_array()
            .ok_or(RetrievalError::MalformedResponse)?;

        Ok(matches
            .iter()
            .map(|m| VectorMatch {
                score: m["score"].as_f64().map(|s| s as f32),
                metadata: m.get("metadata").cloned(),
            })
            .collect())
    }
}

/// Composes the embedding client and the vector client into a single
/// "query text in, context text out" operation.
#[derive(Debug, Clone)]
pub struct ContextComposer {
    completion: Arc<CompletionClient>,
    vector: Arc<VectorSearchClient>,
}

impl ContextComposer {
    #[must_use]
    pub fn new(completion: Arc<CompletionClient>, vector: Arc<VectorSearchClient>) -> Self {
        Self { completion, vector }
    }

    /// Retrieve context for a query.
    ///
    /// Degrades to an empty string on any failure (embedding error, search
    /// error, zero matches); the chat turn proceeds ungrounded. A failed
    /// embedding short-circuits: the vector client is never invoked.
    pub async fn retrieve_context(&self, query_text: &str) -> String {
        let embedding = match self.completion.embed(query_text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(name: "retrieval.embed_failed", error = %e, "Skipping context retrieval");
                return String::new();
            }
        };

        let matches = match self.vector.query(&embedding, TOP_K).await {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(name: "retrieval.query_failed", error = %e, "Skipping context retrieval");
                return String::new();
            }
        };

        format_context(&matches)
    }
}

/// Join the `text` metadata field of each match with a blank line, in
/// provider rank order. Matches without a `text` field are skipped.
fn format_context(matches: &[VectorMatch]) -> String {
    matches
        .iter()
        .filter_map(|m| m.metadata.as_ref()?.get("text")?.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmSettings;

    fn match_with_text(text: Option<&str>) -> VectorMatch {
        VectorMatch {
            score: Some(0.9),
            metadata: text.map(|t| serde_json::json!({ "text": t })),
        }
    }

    #[test]
    fn test_format_context_preserves_rank_order() {
        let matches = vec![
            match_with_text(Some("first snippet")),
            match_with_text(Some("second snippet")),
        ];
        assert_eq!(format_context(&matches), "first snippet\n\nsecond snippet");
    }

    #[test]
    fn test_format_context_skips_matches_without_text() {
        let matches = vec![
            match_with_text(Some("kept")),
            match_with_text(None),
            VectorMatch {
                score: None,
                metadata: Some(serde_json::json!({ "source": "no text field" })),
            },
        ];
        assert_eq!(format_context(&matches), "kept");
    }

    #[test]
    fn test_format_context_empty() {
        assert_eq!(format_context(&[]), "");
    }

    #[tokio::test]
    async fn test_retrieve_context_degrades_on_embed_failure() {
        // No completion API key: embed fails before any network call, and
        // the vector client (pointed at an unroutable address) must never
        // be reached.
        let completion = Arc::new(CompletionClient::new(LlmSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: None,
            model: "m".to_string(),
            embedding_model: "e".to_string(),
            max_tokens: 10,
            temperature: 0.7,
            system_prompt: String::new(),
        }));
        let vector = Arc::new(VectorSearchClient::new(VectorSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: Some("key".to_string()),
            index: "idx".to_string(),
        }));

        let composer = ContextComposer::new(completion, vector);
        assert_eq!(composer.retrieve_context("query").await, "");
    }

    #[tokio::test]
    async fn test_query_without_api_key() {
        let client = VectorSearchClient::new(VectorSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: None,
            index: "idx".to_string(),
        });
        assert!(matches!(
            client.query(&[0.1, 0.2], 5).await,
            Err(RetrievalError::MissingApiKey)
        ));
    }
}
