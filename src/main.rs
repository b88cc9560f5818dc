//! # Ops Knowledge Base CLI (`kb`)
//!
//! ## Usage
//!
//! ```bash
//! kb --config ./config/kb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kb init` | Create the SQLite database and run schema migrations |
//! | `kb ingest` | Ingest the corpus under `[ingest].root` |
//! | `kb search "<query>"` | Retrieve matching chunks |
//! | `kb ask "<query>"` | Answer a question from retrieved context |
//! | `kb stats` | Show what's indexed |
//! | `kb serve` | Start the HTTP server |
//!
//! Logs go to stderr and are filtered by `RUST_LOG` (default
//! `opskb=info,opskb_core=info`, or `debug` with `--verbose`).

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use opskb::config::{self, DEFAULT_CONFIG_PATH};
use opskb::pipeline::RetrievalOverrides;
use opskb::{ingest, migrate, search, server, stats};

/// Ops Knowledge Base: ingest operational docs, search them, and ask
/// questions answered from them.
#[derive(Parser)]
#[command(name = "kb", version)]
struct Cli {
    /// Path to configuration file (TOML). Optional; defaults apply when absent.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest documents into the knowledge store.
    ///
    /// Unchanged files are skipped by content hash. Full runs also remove
    /// sources whose files no longer exist.
    Ingest {
        /// Only ingest `[ingest].priority_files`.
        #[arg(long, conflicts_with = "file")]
        priority_only: bool,

        /// Ingest one path, relative to `[ingest].root`.
        #[arg(long)]
        file: Option<String>,
    },

    /// Retrieve the chunks most relevant to a query.
    Search {
        query: String,
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },

    /// Answer a question from retrieved context.
    Ask {
        query: String,
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },

    /// Show counts of indexed sources, chunks, and vectors.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Args)]
struct RetrievalArgs {
    /// Maximum results (defaults to `[retrieval].max_results`).
    #[arg(long)]
    limit: Option<usize>,

    /// Minimum cosine similarity (defaults to `[retrieval].similarity_threshold`).
    #[arg(long, allow_negative_numbers = true)]
    threshold: Option<f64>,

    /// Disable keyword padding.
    #[arg(long)]
    no_keyword: bool,
}

impl RetrievalArgs {
    fn overrides(&self) -> RetrievalOverrides {
        RetrievalOverrides {
            limit: self.limit,
            threshold: self.threshold,
            keyword: if self.no_keyword { Some(false) } else { None },
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "opskb=debug,opskb_core=debug"
    } else {
        "opskb=info,opskb_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest {
            priority_only,
            file,
        } => {
            ingest::run_ingest(&cfg, priority_only, file.as_deref()).await?;
        }
        Commands::Search { query, retrieval } => {
            search::run_search(&cfg, &query, retrieval.overrides()).await?;
        }
        Commands::Ask { query, retrieval } => {
            search::run_ask(&cfg, &query, retrieval.overrides()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
