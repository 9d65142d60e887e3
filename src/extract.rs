//! Document type detection and text extraction.
//!
//! Only `.pdf` and `.txt` sources are supported. Type detection looks at
//! the extension alone so unsupported files are rejected before any I/O;
//! extraction turns raw bytes into plain UTF-8 text.

use std::path::Path;

use thiserror::Error;

use crate::models::DocumentKind;

/// Extensions accepted by [`detect_kind`].
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt"];

/// Extraction error. The ingestion pipeline wraps it in
/// [`IngestError::Load`](crate::error::IngestError::Load).
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("file is not valid UTF-8 text")]
    Encoding,

    #[error("no extractable text")]
    Empty,
}

/// The lowercase extension of `path`, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Determine the document kind from the extension. Performs no I/O.
pub fn detect_kind(path: &Path) -> Option<DocumentKind> {
    DocumentKind::from_extension(&extension_of(path))
}

/// Extract plain text from raw bytes of the given kind.
pub fn extract_text(bytes: &[u8], kind: DocumentKind) -> Result<String, ExtractError> {
    let text = match kind {
        DocumentKind::Pdf => extract_pdf(bytes)?,
        DocumentKind::Text => decode_utf8(bytes)?,
    };
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

/// Read `path` and extract its text.
pub async fn load_text(path: &Path, kind: DocumentKind) -> Result<String, ExtractError> {
    let bytes = tokio::fs::read(path).await?;
    match kind {
        // pdf-extract is CPU-bound on large files
        DocumentKind::Pdf => tokio::task::spawn_blocking(move || extract_text(&bytes, kind))
            .await
            .map_err(|e| ExtractError::Pdf(e.to_string()))?,
        DocumentKind::Text => extract_text(&bytes, kind),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::Encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_supported_extensions() {
        assert_eq!(detect_kind(Path::new("a/report.PDF")), Some(DocumentKind::Pdf));
        assert_eq!(detect_kind(Path::new("notes.txt")), Some(DocumentKind::Text));
        assert_eq!(detect_kind(Path::new("notes.docx")), None);
        assert_eq!(detect_kind(Path::new("README")), None);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", DocumentKind::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_utf8_returns_error() {
        let err = extract_text(&[0xff, 0xfe, 0x00, 0x41], DocumentKind::Text).unwrap_err();
        assert!(matches!(err, ExtractError::Encoding));
    }

    #[test]
    fn blank_text_is_empty() {
        let err = extract_text(b"  \n\t ", DocumentKind::Text).unwrap_err();
        assert!(matches!(err, ExtractError::Empty));
    }

    #[test]
    fn strips_byte_order_mark() {
        let text = extract_text(b"\xEF\xBB\xBFhello", DocumentKind::Text).unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn missing_file_is_read_error() {
        let err = load_text(Path::new("/definitely/not/here.txt"), DocumentKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Read(_)));
    }
}
