use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::chat::{ChatService, Identity, TurnError};
use crate::config::AppConfig;
use crate::extract::LocalExtractor;
use crate::llm::{ChatMessage, CompletionClient, LlmSettings};
use crate::persistence::{
    ConversationStore, ConversationSummary,
    providers::{memory::MemoryStore, postgres::PostgresStore},
};
use crate::rate_limit::FixedWindowLimiter;
use crate::retrieval::{ContextComposer, VectorSearchClient, VectorSettings};
use crate::security;
use crate::security::claims::UserContext;
use crate::staging::UploadStaging;

/// Reply text returned with a 429.
const RATE_LIMIT_REPLY: &str = "Rate limit exceeded. Please try again later.";

/// Slack on top of the upload size cap for multipart framing.
const UPLOAD_OVERHEAD: usize = 64 * 1024;

/// How often expired ephemeral state (rate windows, upload handles) is
/// swept.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Start the Axum server with the provided configuration.
pub async fn start_server(
    config: Arc<AppConfig>,
    llm_settings: LlmSettings,
    vector_settings: VectorSettings,
) -> anyhow::Result<()> {
    info!(
        name: "llm.config.loaded",
        base_url = %llm_settings.base_url,
        model = %llm_settings.model,
        "LLM configuration loaded"
    );

    // Conversation store, selected by config
    let store: Arc<dyn ConversationStore> = match config.persistence.provider.as_str() {
        "postgres" => {
            let store = PostgresStore::new(&config.persistence.database_url).await?;
            info!(name: "persistence.ready", provider = "postgres", "Conversation store initialized");
            Arc::new(store)
        }
        _ => {
            tracing::warn!(
                name: "persistence.volatile",
                "Using in-memory conversation store; history will not survive a restart"
            );
            Arc::new(MemoryStore::new())
        }
    };

    let state = build_state(&config, llm_settings, vector_settings, store);

    // Sweep elapsed rate windows and expired upload handles so the maps
    // stay bounded across distinct identities.
    let sweep_service = Arc::clone(&state.service);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            sweep_service.purge_ephemeral();
        }
    });

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Wire the service graph from configuration. Shared with tests, which pass
/// their own store and provider settings.
pub fn build_state(
    config: &Arc<AppConfig>,
    llm_settings: LlmSettings,
    vector_settings: VectorSettings,
    store: Arc<dyn ConversationStore>,
) -> AppState {
    let completion = Arc::new(CompletionClient::new(llm_settings));
    let vector = Arc::new(VectorSearchClient::new(vector_settings));
    let composer = ContextComposer::new(Arc::clone(&completion), vector);
    let staging = UploadStaging::new(Duration::from_secs(config.uploads.ttl_secs));
    let limiter = Arc::new(FixedWindowLimiter::new(config.rate_limit));
    let extractor = Arc::new(LocalExtractor::new());

    let service = Arc::new(ChatService::new(
        completion,
        composer,
        store,
        staging,
        limiter,
        extractor,
        config.uploads.dir.clone().into(),
    ));

    AppState {
        service,
        config: Arc::clone(config),
    }
}

/// Build the route table. Every endpoint is registered here, once, at
/// startup.
pub fn build_router(state: AppState) -> Router {
    let timeout_duration = if state.config.resilience.timeout_disabled {
        Duration::from_secs(365 * 24 * 60 * 60) // effectively off
    } else {
        Duration::from_secs(90)
    };

    let body_limit = state.config.uploads.max_size_bytes + UPLOAD_OVERHEAD;

    Router::new()
        .route("/api/chat", post(api_chat))
        .route("/api/upload", post(api_upload))
        .route("/api/process-file", post(api_process_file))
        .route("/api/save", post(api_save))
        .route("/api/history", get(api_history))
        .route("/api/conversations", get(api_conversations))
        .route("/api/conversations/{id}", get(api_conversation))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            security::middleware::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| {
                let duration = timeout_duration;
                async move {
                    match tokio::time::timeout(duration, next.run(req)).await {
                        Ok(res) => res,
                        Err(_) => {
                            (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response()
                        }
                    }
                }
            },
        ))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
    /// Client-generated session token.
    session_id: String,
    /// Optional full history snapshot; replaces the single-message fallback
    /// in the completion request when non-empty.
    #[serde(default)]
    history: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ReplyResponse {
    success: bool,
    reply: String,
}

#[derive(Debug, Serialize)]
struct ApiError {
    success: bool,
    message: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    success: bool,
    file_handle: String,
}

#[derive(Debug, Deserialize)]
struct ProcessFileRequest {
    file_handle: String,
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SaveRequest {
    session_id: String,
    history: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct SaveResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
struct MessagesResponse {
    success: bool,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ConversationsResponse {
    success: bool,
    conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    session_id: String,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiError {
            success: false,
            message: message.into(),
        }),
    )
        .into_response()
}

fn internal_error(context: &str, error: &anyhow::Error) -> Response {
    tracing::error!(name: "api.internal_error", error = ?error, context, "Request failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
}

fn identity_of(user: Option<&Extension<UserContext>>, session_id: &str) -> Identity {
    Identity::new(
        user.map(|Extension(u)| u.user_id.clone()),
        session_id.to_string(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/chat - Run one chat turn.
async fn api_chat(
    State(state): State<AppState>,
    user: Option<Extension<UserContext>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    tracing::info!(
        name: "api.chat",
        session_id = %req.session_id,
        authenticated = user.is_some(),
        history_len = req.history.len(),
        "Received chat request"
    );

    let identity = identity_of(user.as_ref(), &req.session_id);
    match state
        .service
        .chat_turn(&identity, &req.message, &req.history)
        .await
    {
        Ok(reply) => Json(ReplyResponse {
            success: true,
            reply,
        })
        .into_response(),
        Err(TurnError::RateLimited { .. }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ReplyResponse {
                success: false,
                reply: RATE_LIMIT_REPLY.to_string(),
            }),
        )
            .into_response(),
        Err(TurnError::Internal(e)) => internal_error("chat turn", &e),
        // Chat turns touch no upload state.
        Err(e) => internal_error("chat turn", &anyhow::Error::new(e)),
    }
}

/// POST /api/upload - Accept a document and stage it for processing.
async fn api_upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let uploads = &state.config.uploads;
    if !uploads.enabled {
        return api_error(StatusCode::FORBIDDEN, "File upload is disabled.");
    }

    // First `file` field wins; anything else in the form is ignored.
    let mut file: Option<(String, String, axum::body::Bytes)> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read multipart field: {e}"),
                );
            }
        };

        if field.name() != Some("file") {
            continue;
        }

        let Some(filename) = field.file_name().map(ToString::to_string) else {
            return api_error(StatusCode::BAD_REQUEST, "No file uploaded.");
        };

        let declared_type = field
            .content_type()
            .map(ToString::to_string)
            .unwrap_or_else(|| {
                mime_guess::from_path(&filename)
                    .first_or_octet_stream()
                    .to_string()
            });

        match field.bytes().await {
            Ok(bytes) => {
                file = Some((filename, declared_type, bytes));
                break;
            }
            Err(e) => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read file '{filename}': {e}"),
                );
            }
        }
    }

    let Some((filename, declared_type, bytes)) = file else {
        return api_error(StatusCode::BAD_REQUEST, "No file uploaded.");
    };

    let extension = std::path::Path::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    if !uploads.allowed_extensions().contains(&extension.as_str()) {
        return api_error(StatusCode::BAD_REQUEST, "File type not allowed.");
    }

    if bytes.len() > uploads.max_size_bytes {
        return api_error(StatusCode::BAD_REQUEST, "File is too large.");
    }

    match state
        .service
        .stage_upload(&filename, &declared_type, &bytes)
        .await
    {
        Ok(file_handle) => Json(UploadResponse {
            success: true,
            file_handle,
        })
        .into_response(),
        Err(e) => internal_error("upload staging", &e),
    }
}

/// POST /api/process-file - Analyze a previously staged upload.
async fn api_process_file(
    State(state): State<AppState>,
    user: Option<Extension<UserContext>>,
    Json(req): Json<ProcessFileRequest>,
) -> Response {
    let identity = identity_of(user.as_ref(), &req.session_id);
    match state
        .service
        .document_turn(&identity, &req.file_handle)
        .await
    {
        Ok(reply) => Json(ReplyResponse {
            success: true,
            reply,
        })
        .into_response(),
        Err(TurnError::RateLimited { .. }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ReplyResponse {
                success: false,
                reply: RATE_LIMIT_REPLY.to_string(),
            }),
        )
            .into_response(),
        Err(TurnError::UploadNotFound) => {
            api_error(StatusCode::NOT_FOUND, "File not found or expired.")
        }
        Err(TurnError::Extraction(e)) => {
            tracing::warn!(name: "api.extraction_failed", error = %e, "Document processing failed");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to extract text from file.",
            )
        }
        Err(TurnError::Internal(e)) => internal_error("document turn", &e),
    }
}

/// POST /api/save - Replace the conversation with a full history snapshot.
/// Authenticated only.
async fn api_save(
    State(state): State<AppState>,
    user: Option<Extension<UserContext>>,
    Json(req): Json<SaveRequest>,
) -> Response {
    let Some(Extension(user)) = user else {
        return api_error(StatusCode::UNAUTHORIZED, "Authentication required.");
    };

    match state
        .service
        .save_history(&user.user_id, &req.session_id, &req.history)
        .await
    {
        Ok(()) => Json(SaveResponse { success: true }).into_response(),
        Err(e) => internal_error("save history", &e),
    }
}

/// GET /api/history?session_id= - Messages of the caller's conversation for
/// a session. Authenticated only.
async fn api_history(
    State(state): State<AppState>,
    user: Option<Extension<UserContext>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let Some(Extension(user)) = user else {
        return api_error(StatusCode::UNAUTHORIZED, "Authentication required.");
    };

    match state.service.history(&user.user_id, &query.session_id).await {
        Ok(messages) => Json(MessagesResponse {
            success: true,
            messages,
        })
        .into_response(),
        Err(e) => internal_error("history", &e),
    }
}

/// GET /api/conversations - The caller's conversations, newest first.
/// Authenticated only.
async fn api_conversations(
    State(state): State<AppState>,
    user: Option<Extension<UserContext>>,
) -> Response {
    let Some(Extension(user)) = user else {
        return api_error(StatusCode::UNAUTHORIZED, "Authentication required.");
    };

    match state.service.conversations(&user.user_id).await {
        Ok(conversations) => Json(ConversationsResponse {
            success: true,
            conversations,
        })
        .into_response(),
        Err(e) => internal_error("list conversations", &e),
    }
}

/// GET /api/conversations/{id} - One conversation's messages, ownership
/// checked. Authenticated only.
async fn api_conversation(
    State(state): State<AppState>,
    user: Option<Extension<UserContext>>,
    Path(id): Path<i64>,
) -> Response {
    let Some(Extension(user)) = user else {
        return api_error(StatusCode::UNAUTHORIZED, "Authentication required.");
    };

    match state.service.conversation(&user.user_id, id).await {
        Ok(Some(messages)) => Json(MessagesResponse {
            success: true,
            messages,
        })
        .into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "Conversation not found."),
        Err(e) => internal_error("get conversation", &e),
    }
}
