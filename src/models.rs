//! Core data models used throughout DocuMind.
//!
//! These types represent the documents, chunks, index entries, and
//! conversation turns that flow through ingestion, retrieval, and memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Detected type of a source document, derived from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    /// Map a file extension (without the dot, any case) to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "txt" => Some(DocumentKind::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(DocumentKind::Pdf),
            "text" => Some(DocumentKind::Text),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ingested source file. The canonical path string is its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    /// File name shown in citations.
    pub name: String,
    pub kind: DocumentKind,
    pub ingested_at: DateTime<Utc>,
    /// SHA-256 of the extracted text.
    pub content_hash: String,
    pub chunk_count: usize,
    /// Chunker window the entries were cut with.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Embedding model that produced the entries.
    pub embedding_model: String,
}

/// A bounded span of a document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk plus its embedding as stored in the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Monotonically increasing, never reused.
    pub id: i64,
    /// The ingestion run that created this entry.
    pub run_id: Uuid,
    /// Display name of the source document.
    pub source: String,
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// An entry returned from a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry: IndexEntry,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => f.write_str("User"),
            Role::Assistant => f.write_str("Assistant"),
        }
    }
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(DocumentKind::from_extension("PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_extension("txt"), Some(DocumentKind::Text));
        assert_eq!(DocumentKind::from_extension("docx"), None);
        assert_eq!(DocumentKind::from_extension(""), None);
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [DocumentKind::Pdf, DocumentKind::Text] {
            assert_eq!(DocumentKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn turn_serializes_role_lowercase() {
        let turn = Turn::user("hello");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["text"], "hello");
    }
}
