//! One assistant session: an index, a conversation memory and the external
//! collaborators, driven by typed [`Request`]s.
//!
//! The front end decides what kind of request a line of input is; the
//! session never guesses. Successful `Ask`, `Search` and `Chat` requests
//! record a user turn and an assistant turn and save the memory. A failed
//! request records nothing.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::warn;

use crate::answer::{AnswerResult, Answerer};
use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{create_provider, Embedder};
use crate::error::SessionError;
use crate::index::{Checkpoint, VectorIndex, DEFAULT_TOP_K};
use crate::ingest::{IngestResult, IngestSummary, Ingestor};
use crate::llm::{create_model, CompletionRequest, LanguageModel, TokenSink};
use crate::memory::{ConversationMemory, INTERACTIVE_CAPACITY};
use crate::models::Turn;
use crate::progress::{IngestProgressReporter, NoProgress};
use crate::web_search::{create_search, format_results, WebResult, WebSearch};

/// Reply to a search that found nothing.
pub const NO_RESULTS_MESSAGE: &str = "No results found.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Add or refresh one document.
    Ingest { path: PathBuf },
    /// Add every supported document in a directory.
    IngestAll { dir: PathBuf },
    /// Answer from the ingested documents.
    Ask { question: String },
    /// Answer from a live web search.
    Search { query: String },
    /// Answer from general knowledge and the conversation so far.
    Chat { message: String },
    History,
    Clear,
}

#[derive(Debug)]
pub enum Response {
    Ingested(IngestResult),
    IngestedAll(IngestSummary),
    Answer(AnswerResult),
    WebAnswer {
        text: String,
        results: Vec<WebResult>,
    },
    Reply(String),
    History(Vec<Turn>),
    Cleared,
}

/// Tunables taken from the config file.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub chunker: Chunker,
    pub batch_size: usize,
    pub top_k: usize,
    /// Turns passed to the model as context.
    pub context_turns: usize,
    pub recursive: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            chunker: Chunker::default(),
            batch_size: 64,
            top_k: DEFAULT_TOP_K,
            context_turns: INTERACTIVE_CAPACITY,
            recursive: false,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunker: Chunker::new(config.chunking.size, config.chunking.overlap),
            batch_size: config.embedding.batch_size,
            top_k: config.retrieval.top_k,
            context_turns: config.memory.context_turns,
            recursive: config.documents.recursive,
        }
    }
}

pub struct Session {
    index: VectorIndex,
    memory: ConversationMemory,
    embedder: Box<dyn Embedder>,
    model: Box<dyn LanguageModel>,
    search: Box<dyn WebSearch>,
    settings: SessionSettings,
    progress: Box<dyn IngestProgressReporter>,
}

impl Session {
    /// Build the configured providers and load the index and memory from disk.
    /// `sink` receives streamed tokens when `llm.stream` is on.
    pub async fn open(config: &Config, sink: Option<TokenSink>) -> anyhow::Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let model = create_model(&config.llm, sink)?;
        let search = create_search(&config.search)?;

        let index = VectorIndex::open(&config.index.dir)
            .await
            .with_context(|| format!("Failed to open index at {}", config.index.dir.display()))?;
        if let Some(dims) = index.dims() {
            if embedder.dims() > 0 && embedder.dims() != dims {
                warn!(
                    index_dims = dims,
                    provider_dims = embedder.dims(),
                    "embedding dimensions differ from the stored index; re-ingest documents"
                );
            }
        }

        let memory = ConversationMemory::open(
            &config.memory.dir,
            &config.memory.session,
            config.memory.capacity,
        )
        .context("Failed to load conversation memory")?;

        Ok(Self::from_parts(
            index,
            memory,
            embedder,
            model,
            search,
            SessionSettings::from_config(config),
        ))
    }

    pub fn from_parts(
        index: VectorIndex,
        memory: ConversationMemory,
        embedder: Box<dyn Embedder>,
        model: Box<dyn LanguageModel>,
        search: Box<dyn WebSearch>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            index,
            memory,
            embedder,
            model,
            search,
            settings,
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn IngestProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Save the index. On failure the index is reset to `checkpoint`, so it
    /// never holds documents the store lacks and a retry ingests them again.
    async fn persist_or_restore(&self, checkpoint: Checkpoint) -> Result<(), SessionError> {
        if let Err(e) = self.index.persist().await {
            warn!(error = %e, "failed to save index, discarding unsaved changes");
            self.index.restore(checkpoint);
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn handle(&mut self, request: Request) -> Result<Response, SessionError> {
        match request {
            Request::Ingest { path } => {
                let checkpoint = self.index.checkpoint();
                let result = self.ingestor().ingest(&path).await?;
                if !result.unchanged {
                    self.persist_or_restore(checkpoint).await?;
                }
                Ok(Response::Ingested(result))
            }
            Request::IngestAll { dir } => {
                let checkpoint = self.index.checkpoint();
                let summary = self
                    .ingestor()
                    .ingest_all(&dir, self.settings.recursive)
                    .await;
                if summary.changed() {
                    self.persist_or_restore(checkpoint).await?;
                }
                Ok(Response::IngestedAll(summary))
            }
            Request::Ask { question } => {
                let history = self.memory.recent(self.settings.context_turns);
                let result = Answerer::new(&self.index, self.embedder.as_ref(), self.model.as_ref())
                    .with_top_k(self.settings.top_k)
                    .answer(&question, &history)
                    .await?;
                self.record(question, &result.text);
                Ok(Response::Answer(result))
            }
            Request::Search { query } => {
                let results = self.search.search(&query).await?;
                let text = if results.is_empty() {
                    NO_RESULTS_MESSAGE.to_string()
                } else {
                    let history = self.memory.recent(self.settings.context_turns);
                    let request = CompletionRequest::new(search_prompt(&query, &results))
                        .with_history(history);
                    self.model.complete(&request).await?
                };
                self.record(query, &text);
                Ok(Response::WebAnswer { text, results })
            }
            Request::Chat { message } => {
                let history = self.memory.recent(self.settings.context_turns);
                let request = CompletionRequest::new(message.clone()).with_history(history);
                let text = self.model.complete(&request).await?;
                self.record(message, &text);
                Ok(Response::Reply(text))
            }
            Request::History => Ok(Response::History(self.memory.history())),
            Request::Clear => {
                self.memory.clear()?;
                Ok(Response::Cleared)
            }
        }
    }

    fn ingestor(&self) -> Ingestor<'_> {
        Ingestor::new(&self.index, self.embedder.as_ref())
            .with_chunker(self.settings.chunker)
            .with_batch_size(self.settings.batch_size)
            .with_progress(self.progress.as_ref())
    }

    /// Append the exchange and save. A failed save is logged; the answer
    /// has already been produced and is still returned.
    fn record(&mut self, question: String, answer: &str) {
        self.memory.append(Turn::user(question));
        self.memory.append(Turn::assistant(answer));
        if let Err(e) = self.memory.save() {
            warn!(error = %e, "failed to save conversation memory");
        }
    }
}

/// One line of interactive input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Request(Request),
    Quit,
    /// A command given without its required argument.
    Usage(&'static str),
}

/// Classify a line typed at the interactive prompt.
///
/// `upload <file>`, `upload-all [dir]`, `ask <question>`, `search <query>`,
/// `history`, `clear` and `quit`/`exit` are commands; any other text is a
/// general chat message. `upload-all` without a directory uses
/// `default_dir`. Blank lines yield `None`.
pub fn parse_input(line: &str, default_dir: &Path) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let input = match (word.to_ascii_lowercase().as_str(), rest) {
        ("quit" | "exit", "") => Input::Quit,
        ("history", "") => Input::Request(Request::History),
        ("clear", "") => Input::Request(Request::Clear),
        ("upload", "") => Input::Usage("usage: upload <file>"),
        ("upload", path) => Input::Request(Request::Ingest {
            path: PathBuf::from(path),
        }),
        ("upload-all", "") => Input::Request(Request::IngestAll {
            dir: default_dir.to_path_buf(),
        }),
        ("upload-all", dir) => Input::Request(Request::IngestAll {
            dir: PathBuf::from(dir),
        }),
        ("ask", "") => Input::Usage("usage: ask <question>"),
        ("ask", question) => Input::Request(Request::Ask {
            question: question.to_string(),
        }),
        ("search", "") => Input::Usage("usage: search <query>"),
        ("search", query) => Input::Request(Request::Search {
            query: query.to_string(),
        }),
        _ => Input::Request(Request::Chat {
            message: line.to_string(),
        }),
    };
    Some(input)
}

fn search_prompt(query: &str, results: &[WebResult]) -> String {
    format!(
        "Answer the query using the web search results below. \
Cite the URLs you relied on.\n\n{}\nQuery: {}",
        format_results(results),
        query
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let mut config = Config::minimal();
        config.chunking.size = 500;
        config.chunking.overlap = 50;
        config.retrieval.top_k = 4;
        let settings = SessionSettings::from_config(&config);
        assert_eq!(settings.chunker.size(), 500);
        assert_eq!(settings.chunker.overlap(), 50);
        assert_eq!(settings.top_k, 4);
        assert_eq!(settings.context_turns, 10);
    }

    #[test]
    fn parses_commands() {
        let dir = Path::new("docs");
        assert_eq!(parse_input("   ", dir), None);
        assert_eq!(parse_input("quit", dir), Some(Input::Quit));
        assert_eq!(parse_input("EXIT", dir), Some(Input::Quit));
        assert_eq!(
            parse_input("upload papers/a b.pdf", dir),
            Some(Input::Request(Request::Ingest {
                path: PathBuf::from("papers/a b.pdf")
            }))
        );
        assert_eq!(
            parse_input("upload-all", dir),
            Some(Input::Request(Request::IngestAll {
                dir: PathBuf::from("docs")
            }))
        );
        assert_eq!(
            parse_input("ask  what is attention?", dir),
            Some(Input::Request(Request::Ask {
                question: "what is attention?".to_string()
            }))
        );
        assert_eq!(parse_input("search", dir), Some(Input::Usage("usage: search <query>")));
        assert_eq!(
            parse_input("history", dir),
            Some(Input::Request(Request::History))
        );
    }

    #[test]
    fn other_text_is_chat() {
        let dir = Path::new(".");
        assert_eq!(
            parse_input("tell me a joke", dir),
            Some(Input::Request(Request::Chat {
                message: "tell me a joke".to_string()
            }))
        );
        // a command word followed by more text is only a command when it takes an argument
        assert_eq!(
            parse_input("clear the air", dir),
            Some(Input::Request(Request::Chat {
                message: "clear the air".to_string()
            }))
        );
    }

    #[test]
    fn search_prompt_lists_urls() {
        let prompt = search_prompt(
            "rust release",
            &[WebResult {
                title: "Rust 1.80".to_string(),
                snippet: "Released".to_string(),
                url: "https://blog.rust-lang.org".to_string(),
            }],
        );
        assert!(prompt.contains("URL: https://blog.rust-lang.org"));
        assert!(prompt.ends_with("Query: rust release"));
    }
}
