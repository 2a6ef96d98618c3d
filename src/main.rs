//! # docroute CLI
//!
//! Ask questions about documents from the command line, chat with the
//! agent, or start the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! docroute --config ./config/docroute.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docroute query` | Answer with similarity retrieval |
//! | `docroute summarize` | Answer with the summary index |
//! | `docroute route` | Let the router pick the engine |
//! | `docroute chat` | Interactive agent session on stdin |
//! | `docroute serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! docroute query --file paper.pdf "Which optimizer was used?"
//! docroute route --file a.md --file b.md --collection notes "Give me an overview"
//! docroute chat --file paper.pdf
//! RUST_LOG=docroute=debug,docroute_core=debug docroute serve
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use docroute::app::App;
use docroute::config::{self, Config};
use docroute::extract::{content_type_for, to_text_document};
use docroute::ingest::{ingest_files, read_files};
use docroute::server;
use docroute_core::agent::CancelToken;
use docroute_core::router::RetrievalTool;
use docroute_core::{Document, Operation, ScoredChunk};

/// docroute: document Q&A with per-query routing between summarization and
/// similarity retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "docroute",
    about = "Document Q&A with per-query routing between summarization and similarity retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docroute.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Files to ingest before running a command.
#[derive(clap::Args)]
struct Corpus {
    /// File to ingest (repeatable). PDF, DOCX, and text formats are supported.
    #[arg(long = "file", required = true)]
    files: Vec<PathBuf>,

    /// Collection name.
    #[arg(long, default_value = "docs")]
    collection: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question with similarity retrieval over the files.
    Query {
        #[command(flatten)]
        corpus: Corpus,

        /// Number of chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        question: String,
    },

    /// Answer a question from the hierarchical summary of the files.
    Summarize {
        #[command(flatten)]
        corpus: Corpus,

        question: String,
    },

    /// Let the router choose between summarization and similarity retrieval.
    Route {
        #[command(flatten)]
        corpus: Corpus,

        question: String,
    },

    /// Chat with the agent. Attached files can be ingested by asking for it.
    ///
    /// Type `exit` or `bye` to end the session. Ctrl-C cancels the current turn.
    Chat {
        /// File to attach to the session (repeatable).
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve {
        /// File to ingest before serving (repeatable).
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Collection the preloaded files go into.
        #[arg(long, default_value = "docs")]
        collection: String,
    },
}

fn load(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

async fn ingest_corpus(app: &App, files: &[PathBuf], collection: &str) -> Result<()> {
    let blobs = read_files(files)?;
    ingest_files(&app.catalog, collection, blobs).await?;
    Ok(())
}

fn print_sources(sources: &[ScoredChunk]) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (i, s) in sources.iter().enumerate() {
        let preview: String = s.chunk.text.chars().take(100).collect();
        println!(
            "  {}. [{:.3}] {}#{}  {}",
            i + 1,
            s.score,
            s.chunk.document_id,
            s.chunk.chunk_index,
            preview.replace('\n', " ")
        );
    }
}

async fn run_tool(app: &App, tool: RetrievalTool, question: &str, op: Operation) -> Result<()> {
    let answer = tool.run(&app.catalog, &app.engine, question, op).await?;
    println!("{}", answer.text);
    print_sources(&answer.sources);
    Ok(())
}

async fn run_chat(app: &App, files: &[PathBuf]) -> Result<()> {
    let session = app.agent.open_session().await?;
    for blob in read_files(files)? {
        let content_type = content_type_for(&blob.name);
        let document = to_text_document(Document::new(blob.name.clone(), blob.bytes, content_type))?;
        app.agent.attach(&session, document).await?;
        println!("Attached {}", blob.name);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let cancel = CancelToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };
        let result = app.agent.chat(&session, line, &cancel).await;
        watcher.abort();

        match result {
            Ok(reply) => {
                println!("{}", reply.text);
                print_sources(&reply.sources);
                if reply.finished {
                    break;
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }
    app.agent.close_session(&session);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docroute=info,docroute_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load(&cli.config)?;
    let app = App::from_config(&cfg)?;

    match cli.command {
        Commands::Query {
            corpus,
            top_k,
            question,
        } => {
            ingest_corpus(&app, &corpus.files, &corpus.collection).await?;
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k).max(1);
            let rerank_top_n = app.rerank_top_n().map(|n| n.min(top_k));
            let tool = RetrievalTool::vector(&corpus.collection, top_k, rerank_top_n);
            run_tool(&app, tool, &question, Operation::Query).await?;
        }
        Commands::Summarize { corpus, question } => {
            ingest_corpus(&app, &corpus.files, &corpus.collection).await?;
            let tool = RetrievalTool::summary(&corpus.collection);
            run_tool(&app, tool, &question, Operation::Summarize).await?;
        }
        Commands::Route { corpus, question } => {
            ingest_corpus(&app, &corpus.files, &corpus.collection).await?;
            let tools = app.router_tools(&corpus.collection);
            let response = app.router.route(&question, &tools).await?;
            if response.fell_back {
                println!("[{} (fallback)]", response.tool);
            } else {
                println!("[{}]", response.tool);
            }
            println!("{}", response.text);
            print_sources(&response.sources);
        }
        Commands::Chat { files } => {
            run_chat(&app, &files).await?;
        }
        Commands::Serve { files, collection } => {
            if !files.is_empty() {
                ingest_corpus(&app, &files, &collection).await?;
            }
            server::run_server(app).await?;
        }
    }

    Ok(())
}
