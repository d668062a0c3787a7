use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;

use crate::llm::LlmSettings;
use crate::rate_limit::RatePolicy;
use crate::retrieval::VectorSettings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Enable rate limiting
    #[arg(long, env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: Option<bool>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub rate_limit: RatePolicy,
    pub uploads: UploadConfig,
    pub resilience: ResilienceConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    /// HMAC secret for bearer tokens. Empty means no authentication is
    /// configured and every caller is anonymous.
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    pub enabled: bool,
    /// Directory where accepted uploads are staged.
    pub dir: String,
    pub allow_pdf: bool,
    pub allow_doc: bool,
    pub allow_txt: bool,
    /// Per-file size cap in bytes.
    pub max_size_bytes: usize,
    /// Lifetime of a staged upload before its handle expires.
    pub ttl_secs: u64,
}

impl UploadConfig {
    /// Extension allow-list derived from the per-format toggles.
    #[must_use]
    pub fn allowed_extensions(&self) -> Vec<&'static str> {
        let mut allowed = Vec::new();
        if self.allow_pdf {
            allowed.push("pdf");
        }
        if self.allow_doc {
            allowed.push("doc");
            allowed.push("docx");
        }
        if self.allow_txt {
            allowed.push("txt");
            allowed.push("md");
        }
        allowed
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub timeout_disabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    /// `postgres` or `memory`.
    pub provider: String,
    pub database_url: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // Defaults
        builder = builder
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("security.jwt_secret", "")?
            .set_default("rate_limit.enabled", false)?
            .set_default("rate_limit.max_count", 10)?
            .set_default("rate_limit.window", "minute")?
            .set_default("uploads.enabled", true)?
            .set_default("uploads.dir", "data/uploads")?
            .set_default("uploads.allow_pdf", true)?
            .set_default("uploads.allow_doc", true)?
            .set_default("uploads.allow_txt", true)?
            .set_default("uploads.max_size_bytes", 10 * 1024 * 1024)?
            .set_default("uploads.ttl_secs", 60 * 60)?
            .set_default("resilience.timeout_disabled", false)?
            .set_default("persistence.provider", "memory")?
            .set_default("persistence.database_url", "")?;

        // Config file: explicit path first, then ./config.yaml as fallback
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path));
        } else {
            builder = builder.add_source(File::with_name("config").required(false));
        }

        // Environment variables (prefixed with CHAT_), e.g. CHAT_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("CHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // CLI overrides win over everything
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(rl) = cli.rate_limit_enabled {
            builder = builder.set_override("rate_limit.enabled", rl)?;
        }
        if let Some(td) = cli.timeout_disabled {
            builder = builder.set_override("resilience.timeout_disabled", td)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}

pub fn load_llm_settings() -> Result<LlmSettings, String> {
    let base_url = std::env::var("LLM_BASE_URL")
        .map_err(|_| "Missing required env var: LLM_BASE_URL".to_string())?;
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let model = std::env::var("LLM_MODEL")
        .map_err(|_| "Missing required env var: LLM_MODEL".to_string())?;
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = std::env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let embedding_model = env::var("LLM_EMBEDDING_MODEL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "text-embedding-ada-002".to_string());

    let max_tokens = env::var("LLM_MAX_TOKENS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(500);

    let temperature = env::var("LLM_TEMPERATURE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.7);

    let system_prompt = env::var("LLM_SYSTEM_PROMPT")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "You are a helpful AI assistant.".to_string());

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
        embedding_model,
        max_tokens,
        temperature,
        system_prompt,
    })
}

pub fn load_vector_settings() -> VectorSettings {
    let base_url = env::var("VECTOR_BASE_URL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "https://api.pinecone.io".to_string());

    let api_key = env::var("VECTOR_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let index = env::var("VECTOR_INDEX")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "default".to_string());

    VectorSettings {
        base_url,
        api_key,
        index,
    }
}
