//! Typed errors for every component.
//!
//! Each component returns its own error enum so callers can branch on the
//! failure kind without string inspection. [`SessionError`] wraps them all
//! for the request dispatcher; the CLI converts to `anyhow` at the edge.

use std::path::PathBuf;

use thiserror::Error;

use crate::extract::ExtractError;

/// Failure talking to an external service (embeddings, language model,
/// web search).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{var} environment variable not set")]
    MissingApiKey { var: &'static str },

    #[error("{service} provider is disabled")]
    Disabled { service: &'static str },

    #[error("{service} request timed out after {secs}s")]
    Timeout { service: &'static str, secs: u64 },

    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} API error {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid {service} response: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },
}

impl ProviderError {
    /// Classify a transport error, separating timeouts from other failures.
    pub fn from_reqwest(service: &'static str, secs: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout { service, secs }
        } else {
            ProviderError::Http {
                service,
                source: err,
            }
        }
    }

    pub fn invalid(service: &'static str, reason: impl Into<String>) -> Self {
        ProviderError::InvalidResponse {
            service,
            reason: reason.into(),
        }
    }

    /// Rate limits, server errors, timeouts and network errors are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout { .. } | ProviderError::Http { .. } => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Vector index and index-store failures.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index store error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("index store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("index store at {} is corrupted: {reason}", path.display())]
    Corruption { path: PathBuf, reason: String },

    #[error("embedding has {actual} dimensions, index holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding vector is empty")]
    EmptyEmbedding,
}

/// Single-document ingestion failures. Every variant leaves the index
/// exactly as it was before the call.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported format '{extension}' for {} (expected .pdf or .txt)", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("failed to load {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },

    #[error("failed to embed {}: {source}", path.display())]
    Embedding {
        path: PathBuf,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Retrieval-augmented answering failures.
#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("failed to embed question: {0}")]
    Embedding(#[source] ProviderError),

    #[error("language model failed: {0}")]
    Model(#[source] ProviderError),

    /// The question embedding does not fit the index, usually because the
    /// embedding model changed since the documents were ingested.
    #[error("cannot search the index: {0}")]
    Index(#[from] IndexError),
}

/// Conversation memory persistence failures.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("memory store at {} is corrupted: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid session id '{0}': use letters, digits, '-' or '_'")]
    InvalidSession(String),
}

/// Anything a [`Session`](crate::session::Session) request can fail with.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Answer(#[from] AnswerError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
