//! # datadoc CLI
//!
//! ## Usage
//!
//! ```bash
//! datadoc --config ./config/datadoc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `datadoc serve` | Start the chat web server |
//! | `datadoc documents` | List the documents that would be loaded |
//! | `datadoc select "<question>"` | Show document scores for a question |
//! | `datadoc ask "<question>"` | Answer one question from the terminal |
//!
//! Logging is controlled with `RUST_LOG` (default `info`) and written to
//! stderr. A `.env` file in the working directory is loaded if present.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use datadoc_bot::{commands, config, server};

/// datadoc: answers questions about data-analytics documentation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/datadoc.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "datadoc",
    about = "A document-grounded chat assistant for data-analytics documentation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/datadoc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (chat page, `POST /ask`, `GET /documents`, `GET /health`).
    ///
    /// Refuses to start when no document can be loaded.
    Serve,

    /// List loaded documents with their size, sections and tables.
    Documents,

    /// Score every document against a question and show the selection.
    ///
    /// Does not call the completion API.
    Select {
        /// The question to analyze.
        question: String,
    },

    /// Answer a single question using the completion API.
    Ask {
        /// The question to answer.
        question: String,

        /// Session identifier for the conversation history.
        #[arg(long, default_value = "cli")]
        session: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Documents => {
            commands::run_documents(&cfg)?;
        }
        Commands::Select { question } => {
            commands::run_select(&cfg, &question)?;
        }
        Commands::Ask { question, session } => {
            commands::run_ask(&cfg, &question, &session).await?;
        }
    }

    Ok(())
}
