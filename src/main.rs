//! # docqa CLI
//!
//! The `docqa` binary runs the document question-answering backend: it
//! initializes the database, ingests files, answers questions, reports usage,
//! and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite database and run schema migrations |
//! | `docqa upload <file> --user <id>` | Extract, chunk, embed and index a PDF or DOCX |
//! | `docqa ask "<question>" --user <id>` | Answer a question from the user's documents |
//! | `docqa documents --user <id>` | List a user's documents and their status |
//! | `docqa stats [--user <id>]` | Usage counters for one user or the whole system |
//! | `docqa serve` | Start the HTTP server |
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to change verbosity.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docqa::{answer, config, db, ingest, migrate, server, stats};

/// docqa: question answering over your own uploaded documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. API keys are read from the environment variables the config names.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "docqa: retrieval-augmented question answering over uploaded documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the documents and user_stats
    /// tables. Running it again is safe.
    Init,

    /// Ingest a PDF or DOCX file for a user.
    Upload {
        /// Path to the file.
        path: PathBuf,

        /// Owning user id.
        #[arg(long)]
        user: i64,
    },

    /// Ask a question against a user's indexed documents.
    Ask {
        /// The question.
        query: String,

        /// User whose documents are searched.
        #[arg(long)]
        user: i64,
    },

    /// List a user's documents.
    Documents {
        #[arg(long)]
        user: i64,
    },

    /// Show usage counters.
    ///
    /// With `--user`, shows that user's counters; otherwise system totals.
    Stats {
        #[arg(long)]
        user: Option<i64>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Upload { path, user } => {
            ingest::run_upload(&cfg, user, &path).await?;
        }
        Commands::Ask { query, user } => {
            answer::run_ask(&cfg, user, &query).await?;
        }
        Commands::Documents { user } => {
            stats::run_documents(&cfg, user).await?;
        }
        Commands::Stats { user } => {
            stats::run_stats(&cfg, user).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
