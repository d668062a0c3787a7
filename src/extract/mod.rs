//! Document text-extraction boundary.
//!
//! The orchestrator sees extraction as a single capability: plain text from
//! a byte buffer and a declared MIME type, or a typed failure. The local
//! provider covers plain text, Markdown, and PDF.

mod local;

pub use local::LocalExtractor;

/// Errors that can occur during text extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The declared type is not handled by this extractor.
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// The file is not valid UTF-8 text.
    #[error("file is not valid UTF-8 text")]
    InvalidEncoding,

    /// The document could not be parsed.
    #[error("failed to parse document: {0}")]
    Parse(String),

    /// An I/O error occurred while reading the file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for text-extraction providers.
pub trait TextExtractor: Send + Sync + std::fmt::Debug {
    /// Extract plain text from `bytes`, interpreting them per `mime_type`.
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, ExtractError>;

    /// Check whether this extractor handles the given MIME type.
    fn supports_mime_type(&self, mime_type: &str) -> bool;
}
