//! In-process text extraction for plain text, Markdown, and PDF.

use super::{ExtractError, TextExtractor};

/// Extractor backed by `pdf-extract` for PDFs and direct UTF-8 decoding for
/// text formats. Word-processor formats are not handled locally and fail
/// with [`ExtractError::UnsupportedType`].
#[derive(Debug, Default, Clone)]
pub struct LocalExtractor;

impl LocalExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for LocalExtractor {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, ExtractError> {
        if mime_type.contains("pdf") {
            return pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| ExtractError::Parse(e.to_string()));
        }

        if mime_type.starts_with("text/") {
            return String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::InvalidEncoding);
        }

        Err(ExtractError::UnsupportedType(mime_type.to_string()))
    }

    fn supports_mime_type(&self, mime_type: &str) -> bool {
        mime_type.contains("pdf") || mime_type.starts_with("text/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passthrough() {
        let extractor = LocalExtractor::new();
        let text = extractor
            .extract(b"hello document", "text/plain")
            .expect("plain text should extract");
        assert_eq!(text, "hello document");
    }

    #[test]
    fn test_markdown_is_text() {
        let extractor = LocalExtractor::new();
        let text = extractor
            .extract(b"# Title\n\nBody", "text/markdown")
            .expect("markdown should extract");
        assert!(text.starts_with("# Title"));
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let extractor = LocalExtractor::new();
        let result = extractor.extract(&[0xff, 0xfe, 0x00], "text/plain");
        assert!(matches!(result, Err(ExtractError::InvalidEncoding)));
    }

    #[test]
    fn test_garbage_pdf_fails_to_parse() {
        let extractor = LocalExtractor::new();
        let result = extractor.extract(b"not a pdf", "application/pdf");
        assert!(matches!(result, Err(ExtractError::Parse(_))));
    }

    #[test]
    fn test_word_documents_are_unsupported() {
        let extractor = LocalExtractor::new();
        let result = extractor.extract(b"...", "application/msword");
        assert!(matches!(result, Err(ExtractError::UnsupportedType(_))));
        assert!(!extractor.supports_mime_type("application/msword"));
    }
}
