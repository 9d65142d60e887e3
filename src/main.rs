//! # DocuMind CLI (`documind`)
//!
//! Ask questions about your own documents, search the web, or just chat,
//! with the conversation remembered between runs.
//!
//! ## Usage
//!
//! ```bash
//! documind --config ./config/documind.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `documind ingest <file>` | Add or refresh one `.pdf` or `.txt` document |
//! | `documind ingest-all [dir]` | Add every supported document in a directory |
//! | `documind ask "<question>"` | Answer from the ingested documents |
//! | `documind search "<query>"` | Answer from a live web search |
//! | `documind chat` | Interactive loop (the default) |
//! | `documind history` | Print the remembered conversation |
//! | `documind clear` | Forget the conversation |
//! | `documind documents` | List ingested documents |
//! | `documind completions <shell>` | Print a shell completion script |
//!
//! Without a config file the built-in defaults are used: OpenAI for
//! embeddings and answers, SerpAPI for web search, data under `./data`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use documind::answer::AnswerResult;
use documind::config::{self, Config};
use documind::index::VectorIndex;
use documind::ingest::{IngestResult, IngestSummary};
use documind::llm::TokenSink;
use documind::memory::{memory_file, ConversationMemory};
use documind::models::Turn;
use documind::progress::ProgressMode;
use documind::session::{parse_input, Input, Request, Response, Session};
use documind::web_search::WebResult;

/// DocuMind: a local research assistant for your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/documind.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "documind",
    about = "DocuMind: answer questions from your documents, the web, or general knowledge",
    version,
    long_about = "DocuMind ingests PDF and plain-text documents into a local vector index, \
    answers questions grounded in the most relevant passages with source citations, \
    can answer from a live web search, and remembers the conversation between runs."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/documind.toml`. Built-in defaults are used
    /// when the file does not exist.
    #[arg(long, global = true, default_value = "./config/documind.toml")]
    config: PathBuf,

    /// Log debug output to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Ingestion progress on stderr: off, human, or json.
    /// Defaults to human when stderr is a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add or refresh one document.
    ///
    /// Re-ingesting a file replaces its previous chunks; a file whose text
    /// has not changed is skipped without calling the embedding provider.
    Ingest {
        /// Path to a `.pdf` or `.txt` file.
        path: PathBuf,
    },

    /// Add every supported document in a directory.
    ///
    /// Files with other extensions are skipped. One bad file does not stop
    /// the rest.
    IngestAll {
        /// Directory to scan. Defaults to `[documents].dir`.
        dir: Option<PathBuf>,

        /// Descend into subdirectories.
        #[arg(long)]
        recursive: bool,
    },

    /// Answer a question from the ingested documents.
    Ask {
        /// The question.
        question: String,
    },

    /// Answer a query from a live web search.
    Search {
        /// The search query.
        query: String,
    },

    /// Start the interactive loop.
    ///
    /// Type `upload <file>`, `upload-all [dir]`, `ask <question>`,
    /// `search <query>`, `history`, `clear` or `quit`. Anything else is a
    /// general chat message.
    Chat,

    /// Print the remembered conversation.
    History,

    /// Forget the conversation and delete its file.
    Clear,

    /// List ingested documents.
    Documents,

    /// Print a shell completion script.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let command = cli.command.unwrap_or(Commands::Chat);

    // Commands that don't require config
    if let Commands::Completions { shell } = command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "documind",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let mut cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::debug!(path = %cli.config.display(), "no config file, using defaults");
        Config::minimal()
    };
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    // Commands that don't need providers
    match &command {
        Commands::History => {
            let memory =
                ConversationMemory::open(&cfg.memory.dir, &cfg.memory.session, cfg.memory.capacity)?;
            print_history(&memory.history());
            return Ok(());
        }
        Commands::Clear => {
            let path = memory_file(&cfg.memory.dir, &cfg.memory.session)?;
            ConversationMemory::persistent(path, cfg.memory.capacity).clear()?;
            println!("Conversation history cleared.");
            return Ok(());
        }
        Commands::Documents => {
            let index = VectorIndex::open(&cfg.index.dir).await?;
            print_documents(&index);
            return Ok(());
        }
        _ => {}
    }

    if let Commands::IngestAll {
        recursive: true, ..
    } = &command
    {
        cfg.documents.recursive = true;
    }

    let streamed = Arc::new(AtomicBool::new(false));
    let sink: TokenSink = {
        let streamed = Arc::clone(&streamed);
        Arc::new(move |token: &str| {
            streamed.store(true, Ordering::SeqCst);
            let mut out = std::io::stdout();
            let _ = out.write_all(token.as_bytes());
            let _ = out.flush();
        })
    };

    let mut session = Session::open(&cfg, Some(sink))
        .await
        .context("Failed to start session")?
        .with_progress(progress.reporter());
    let mut front = Frontend { streamed };

    match command {
        Commands::Ingest { path } => front.run(&mut session, Request::Ingest { path }).await?,
        Commands::IngestAll { dir, .. } => {
            let dir = dir.unwrap_or_else(|| cfg.documents.dir.clone());
            front.run(&mut session, Request::IngestAll { dir }).await?
        }
        Commands::Ask { question } => front.run(&mut session, Request::Ask { question }).await?,
        Commands::Search { query } => front.run(&mut session, Request::Search { query }).await?,
        Commands::Chat => front.repl(&mut session, &cfg.documents.dir).await?,
        Commands::History | Commands::Clear | Commands::Documents | Commands::Completions { .. } => {
            // Handled above
            unreachable!()
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "documind=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Prints responses, tracking whether the answer was already streamed.
struct Frontend {
    streamed: Arc<AtomicBool>,
}

impl Frontend {
    /// Handle one request, printing the response. Errors propagate.
    async fn run(&mut self, session: &mut Session, request: Request) -> Result<()> {
        let response = self.handle(session, request).await?;
        self.print(&response);
        if let Response::IngestedAll(summary) = &response {
            if summary.ingested.is_empty() && !summary.failed.is_empty() {
                anyhow::bail!("no documents were ingested");
            }
        }
        Ok(())
    }

    async fn handle(&mut self, session: &mut Session, request: Request) -> Result<Response> {
        self.streamed.store(false, Ordering::SeqCst);
        let response = session.handle(request).await;
        if self.streamed.load(Ordering::SeqCst) {
            println!();
        }
        Ok(response?)
    }

    async fn repl(&mut self, session: &mut Session, default_dir: &Path) -> Result<()> {
        println!("DocuMind interactive mode. Commands: upload <file>, upload-all [dir], ask <question>, search <query>, history, clear, quit.");
        println!("Anything else is sent as a chat message.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush().ok();

            let line = tokio::select! {
                line = lines.next_line() => line.context("Failed to read input")?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            };
            let Some(line) = line else {
                println!();
                break;
            };

            let request = match parse_input(&line, default_dir) {
                None => continue,
                Some(Input::Quit) => break,
                Some(Input::Usage(usage)) => {
                    println!("{}", usage);
                    continue;
                }
                Some(Input::Request(request)) => request,
            };

            match self.handle(session, request).await {
                Ok(response) => self.print(&response),
                Err(e) => eprintln!("Error: {:#}", e),
            }
        }

        println!("Goodbye.");
        Ok(())
    }

    fn print(&self, response: &Response) {
        let streamed = self.streamed.load(Ordering::SeqCst);
        match response {
            Response::Ingested(result) => print_ingested(result),
            Response::IngestedAll(summary) => print_summary(summary),
            Response::Answer(answer) => print_answer(answer, streamed),
            Response::WebAnswer { text, results } => print_web_answer(text, results, streamed),
            Response::Reply(text) => {
                if !streamed {
                    println!("{}", text);
                }
            }
            Response::History(turns) => print_history(turns),
            Response::Cleared => println!("Conversation history cleared."),
        }
    }
}

fn print_ingested(result: &IngestResult) {
    if result.unchanged {
        println!("{} is unchanged.", result.name);
    } else if result.chunks_replaced > 0 {
        println!(
            "Re-ingested {}: {} chunks (replaced {}).",
            result.name, result.chunks_added, result.chunks_replaced
        );
    } else {
        println!("Ingested {}: {} chunks.", result.name, result.chunks_added);
    }
}

fn print_summary(summary: &IngestSummary) {
    for result in &summary.ingested {
        print_ingested(result);
    }
    for (path, err) in &summary.failed {
        eprintln!("Failed {}: {}", path.display(), err);
    }
    println!(
        "Ingested {} documents ({} chunks), {} failed, {} skipped.",
        summary.ingested.len(),
        summary.chunks_added(),
        summary.failed.len(),
        summary.skipped.len()
    );
}

fn print_answer(answer: &AnswerResult, streamed: bool) {
    if !streamed {
        println!("{}", answer.text);
    }
    if !answer.sources.is_empty() {
        println!();
        println!("Sources: {}", answer.sources.join(", "));
    }
}

fn print_web_answer(text: &str, results: &[WebResult], streamed: bool) {
    if !streamed {
        println!("{}", text);
    }
    if !results.is_empty() {
        println!();
        println!("Sources:");
        for result in results {
            println!("  - {} ({})", result.title, result.url);
        }
    }
}

fn print_history(turns: &[Turn]) {
    if turns.is_empty() {
        println!("No conversation history.");
        return;
    }
    for (i, turn) in turns.iter().enumerate() {
        println!("{}. {}: {}", i + 1, turn.role, turn.text);
    }
}

fn print_documents(index: &VectorIndex) {
    let documents = index.documents();
    if documents.is_empty() {
        println!("No documents ingested.");
        return;
    }
    for doc in documents {
        println!(
            "{}  {:>4} chunks  {}  {}",
            doc.ingested_at.format("%Y-%m-%d %H:%M"),
            doc.chunk_count,
            doc.kind,
            doc.name
        );
    }
    println!("{} entries, {} dims", index.len(), index.dims().unwrap_or(0));
}
