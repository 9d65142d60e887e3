//! Retrieval-augmented answering.
//!
//! Embeds the question, pulls the `top_k` nearest chunks from the index,
//! and asks the language model to answer from those chunks alone. The
//! answer comes back with the chunks it was grounded on and the distinct
//! source names in rank order.

use tracing::debug;

use crate::embedding::{embed_query, Embedder};
use crate::error::AnswerError;
use crate::index::{VectorIndex, DEFAULT_TOP_K};
use crate::llm::{CompletionRequest, LanguageModel};
use crate::models::{SearchHit, Turn};

/// Returned when there is nothing to retrieve from.
pub const NO_DOCUMENTS_MESSAGE: &str =
    "No documents have been processed yet. Please upload a document first.";

/// A chunk used to ground an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Display name of the source document.
    pub source: String,
    pub document_id: String,
    /// Position of the chunk within its document.
    pub sequence: i64,
    pub score: f32,
    pub text: String,
}

impl From<SearchHit> for RetrievedChunk {
    fn from(hit: SearchHit) -> Self {
        Self {
            source: hit.entry.source,
            document_id: hit.entry.chunk.document_id,
            sequence: hit.entry.chunk.chunk_index,
            score: hit.score,
            text: hit.entry.chunk.text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerResult {
    pub text: String,
    /// Distinct source names, best-ranked first.
    pub sources: Vec<String>,
    pub chunks: Vec<RetrievedChunk>,
    /// Whether the answer was produced from retrieved chunks.
    pub grounded: bool,
}

impl AnswerResult {
    pub fn no_documents() -> Self {
        Self {
            text: NO_DOCUMENTS_MESSAGE.to_string(),
            sources: Vec::new(),
            chunks: Vec::new(),
            grounded: false,
        }
    }
}

pub struct Answerer<'a> {
    index: &'a VectorIndex,
    embedder: &'a dyn Embedder,
    model: &'a dyn LanguageModel,
    top_k: usize,
}

impl<'a> Answerer<'a> {
    pub fn new(
        index: &'a VectorIndex,
        embedder: &'a dyn Embedder,
        model: &'a dyn LanguageModel,
    ) -> Self {
        Self {
            index,
            embedder,
            model,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Answer `question` from the indexed documents. `history` is passed to
    /// the model as earlier conversation.
    pub async fn answer(&self, question: &str, history: &[Turn]) -> Result<AnswerResult, AnswerError> {
        if self.index.is_empty() {
            return Ok(AnswerResult::no_documents());
        }

        let query = embed_query(self.embedder, question)
            .await
            .map_err(AnswerError::Embedding)?;
        let hits = self.index.search(&query, self.top_k)?;
        if hits.is_empty() {
            return Ok(AnswerResult::no_documents());
        }

        let chunks: Vec<RetrievedChunk> = hits.into_iter().map(RetrievedChunk::from).collect();
        debug!(
            question,
            retrieved = chunks.len(),
            best = chunks[0].score,
            "retrieved context"
        );

        let request = CompletionRequest::new(build_prompt(question, &chunks))
            .with_history(history.to_vec());
        let text = self
            .model
            .complete(&request)
            .await
            .map_err(AnswerError::Model)?;

        Ok(AnswerResult {
            text,
            sources: distinct_sources(&chunks),
            chunks,
            grounded: true,
        })
    }
}

/// Concatenate chunks, each tagged `[source: <name> #<seq>]`.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("[source: {} #{}]\n{}", c.source, c.sequence, c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(question: &str, chunks: &[RetrievedChunk]) -> String {
    format!(
        "Use the following pieces of context to answer the question at the end. \
If the answer is not contained in the context, say that you don't know; \
don't try to make up an answer. Cite the sources you used.\n\n\
{}\n\nQuestion: {}\nHelpful Answer:",
        build_context(chunks),
        question
    )
}

fn distinct_sources(chunks: &[RetrievedChunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for chunk in chunks {
        if !sources.contains(&chunk.source) {
            sources.push(chunk.source.clone());
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, sequence: i64, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            source: source.to_string(),
            document_id: format!("/docs/{}", source),
            sequence,
            score: 0.5,
            text: text.to_string(),
        }
    }

    #[test]
    fn context_tags_each_chunk() {
        let context = build_context(&[chunk("a.txt", 0, "alpha"), chunk("b.pdf", 3, "beta")]);
        assert_eq!(context, "[source: a.txt #0]\nalpha\n\n[source: b.pdf #3]\nbeta");
    }

    #[test]
    fn prompt_ends_with_question() {
        let prompt = build_prompt("Who?", &[chunk("a.txt", 0, "alpha")]);
        assert!(prompt.starts_with("Use the following pieces of context"));
        assert!(prompt.contains("[source: a.txt #0]"));
        assert!(prompt.ends_with("Question: Who?\nHelpful Answer:"));
    }

    #[test]
    fn sources_deduplicated_in_rank_order() {
        let chunks = [
            chunk("b.pdf", 1, "x"),
            chunk("a.txt", 0, "y"),
            chunk("b.pdf", 2, "z"),
        ];
        assert_eq!(distinct_sources(&chunks), vec!["b.pdf", "a.txt"]);
    }

    #[test]
    fn no_documents_is_ungrounded() {
        let result = AnswerResult::no_documents();
        assert!(!result.grounded);
        assert_eq!(result.text, NO_DOCUMENTS_MESSAGE);
        assert!(result.sources.is_empty());
    }
}
