//! # repochat CLI
//!
//! Mirrors a local git repository into a vector index, keeps the index in
//! step with new commits, and answers questions about the code.
//!
//! ## Usage
//!
//! ```bash
//! repochat --config ./config/repochat.toml [--repo <path>] [command]
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repochat chat` | Interactive chat (default) with background reindexing |
//! | `repochat index [--full]` | Run one reindex cycle, or rebuild the whole index |
//! | `repochat update` | Reindex uncommitted working-tree changes |
//! | `repochat status` | Show tracked revision, drift and chunk counts |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use repo_chat::config::{self, Config};
use repo_chat::detect::DetectMode;
use repo_chat::embedding::{create_embedder, DisabledEmbedder, Embedder};
use repo_chat::llm::{create_chat_model, ChatModel};
use repo_chat::reindex::Orchestrator;
use repo_chat::repl;
use repo_chat::session::ChatSession;
use repo_chat::store::sqlite::SqliteStore;
use repo_chat::store::IndexStore;
use repo_chat::vcs::GitCli;

const DEFAULT_CONFIG_PATH: &str = "./config/repochat.toml";

/// Chat with a git repository.
#[derive(Parser)]
#[command(
    name = "repochat",
    about = "Chat with a git repository through a continuously updated vector index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/repochat.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository to work on. Falls back to `DEFAULT_REPO_PATH`, then to an
    /// interactive prompt.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask questions about the repository (default).
    Chat,

    /// Bring the index up to date with the latest commit.
    Index {
        /// Drop every chunk of the repository and embed it from scratch.
        #[arg(long)]
        full: bool,
    },

    /// Reindex files with uncommitted changes.
    Update,

    /// Show the indexing state of the repository.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::load_or_default(Path::new(DEFAULT_CONFIG_PATH))?,
    };

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    let repo = repl::resolve_repo_path(cli.repo.as_deref(), &mut input, &mut stdout).await?;

    let store: Arc<dyn IndexStore> = Arc::new(open_store(&cfg).await?);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
            let chat: Arc<dyn ChatModel> = Arc::from(create_chat_model(&cfg.chat)?);
            let (orchestrator, is_new) =
                Orchestrator::open(&repo, &cfg, Arc::new(GitCli), embedder.clone(), store.clone())?;
            let orchestrator = Arc::new(orchestrator);

            if is_new {
                println!(
                    "First time seeing {}, indexing the whole repository...",
                    orchestrator.repo_path()
                );
                let report = orchestrator.rebuild().await?;
                repl::write_cycle_report(&mut stdout, &report)?;
            } else {
                let report = orchestrator.run_cycle(DetectMode::CommittedDiff).await?;
                repl::write_cycle_report(&mut stdout, &report)?;
            }

            let poller = orchestrator
                .clone()
                .spawn_poller(Duration::from_secs(cfg.reindex.interval_secs));

            let mut session = ChatSession::new(
                orchestrator.repo_path(),
                store.clone(),
                embedder,
                chat,
                cfg.retrieval.top_k,
                cfg.chat.history_window,
            );
            let result = repl::run_chat_loop(&mut session, &orchestrator, &mut input, &mut stdout).await;

            poller.abort();
            store.persist().await?;
            result?;
        }
        Commands::Index { full } => {
            let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
            let (orchestrator, is_new) =
                Orchestrator::open(&repo, &cfg, Arc::new(GitCli), embedder, store.clone())?;
            let report = if full || is_new {
                orchestrator.rebuild().await?
            } else {
                orchestrator.run_cycle(DetectMode::CommittedDiff).await?
            };
            repl::write_cycle_report(&mut stdout, &report)?;
        }
        Commands::Update => {
            let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
            let (orchestrator, _) =
                Orchestrator::open(&repo, &cfg, Arc::new(GitCli), embedder, store.clone())?;
            let report = orchestrator.run_cycle(DetectMode::WorkingTree).await?;
            repl::write_cycle_report(&mut stdout, &report)?;
        }
        Commands::Status => {
            let (orchestrator, _) = Orchestrator::open(
                &repo,
                &cfg,
                Arc::new(GitCli),
                Arc::new(DisabledEmbedder),
                store.clone(),
            )?;
            let status = orchestrator.status().await?;
            repl::write_status(&mut stdout, &status)?;
        }
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> Result<SqliteStore> {
    let mut store = SqliteStore::open(&cfg.db.path)
        .await?
        .with_group_size(cfg.reindex.insert_group_size);
    if cfg.embedding.is_enabled() {
        store = store.with_dims(cfg.embedding.dims);
    }
    Ok(store)
}
