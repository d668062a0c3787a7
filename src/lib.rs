//! Retrieval-augmented conversation service.
//!
//! An HTTP service that turns an incoming user message (or an uploaded
//! document) into a grounded LLM reply: queries are embedded, matched
//! against an external vector index, and the retrieved context is injected
//! into the system prompt before the completion call. Per-identity rate
//! limits guard the completion provider; authenticated conversations are
//! persisted.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP server with an explicit route table
//! - **Completion/Embedding**: non-streaming client for the LLM provider
//! - **Retrieval**: vector search client + context composer
//! - **Persistence**: conversation store (Postgres or in-memory)
//! - **Staging**: TTL-bound upload handles over an expiring key-value map
//!
//! # Modules
//!
//! - [`llm`]: completion and embedding client
//! - [`retrieval`]: vector search and context composition
//! - [`chat`]: request orchestration
//! - [`persistence`]: durable conversation store
//! - [`rate_limit`]: fixed-window admission control

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod cache;
pub mod chat;
pub mod config;
pub mod extract;
pub mod llm;
pub mod persistence;
pub mod rate_limit;
pub mod retrieval;
pub mod security;
pub mod server;
pub mod staging;

use std::sync::Arc;

use crate::chat::ChatService;
use crate::config::AppConfig;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Request orchestrator.
    pub service: Arc<ChatService>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}
