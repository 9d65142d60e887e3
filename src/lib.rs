//! # DocuMind
//!
//! A local research assistant that answers questions from your own
//! documents, from a live web search, or from general knowledge, and
//! remembers the conversation between runs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ .pdf / .txt │──▶│   Pipeline   │──▶│ VectorIndex  │──▶ index.sqlite
//! │   files     │   │ Chunk+Embed  │   │ (in memory)  │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │ top-k
//!                    ┌──────────┐       ┌─────▼──────┐
//!   question ───────▶│ Session  │──────▶│  Answerer  │──▶ LLM
//!                    └────┬─────┘       └────────────┘
//!                         │
//!                         ▼
//!                  memory_<session>.json
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! documind ingest ./papers/attention.pdf
//! documind ask "What does the paper say about positional encoding?"
//! documind search "latest Rust release"
//! documind chat                 # interactive loop
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors per component |
//! | [`extract`] | File type detection and text extraction |
//! | [`chunk`] | Sliding-window text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | SQLite persistence for the index |
//! | [`index`] | Vector index and similarity search |
//! | [`ingest`] | Ingestion pipeline |
//! | [`progress`] | Directory ingestion progress on stderr |
//! | [`llm`] | Chat-completion client |
//! | [`answer`] | Retrieval-augmented answering |
//! | [`web_search`] | SerpAPI web search |
//! | [`memory`] | Bounded, persisted conversation memory |
//! | [`session`] | Typed request dispatch |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod memory;
pub mod models;
pub mod progress;
pub mod session;
pub mod store;
pub mod web_search;
