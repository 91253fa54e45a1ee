//! # IntelliClaim CLI (`intelliclaim`)
//!
//! ## Usage
//!
//! ```bash
//! intelliclaim --config ./config/intelliclaim.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `intelliclaim index` | Build (or reuse) the policy index |
//! | `intelliclaim ask "<query>"` | Run one query and print the JSON response |
//! | `intelliclaim search "<term>"` | Run the configured retriever only |
//! | `intelliclaim serve` | Index, then serve HTTP and progress events |
//! | `intelliclaim seed [PATH]` | Write the sample HealthPlus policy |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use intelliclaim::{commands, config};

/// IntelliClaim: insurance coverage answers grounded in your policy document.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(name = "intelliclaim", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/intelliclaim.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the retrieval index from the policy document.
    ///
    /// Reuses an up-to-date index unless `--rebuild` is given or
    /// `index.on_existing = "rebuild"`.
    Index {
        /// Policy document to index (overrides `index.source_document`).
        #[arg(long)]
        document: Option<PathBuf>,

        /// Rebuild even if the stored index matches.
        #[arg(long)]
        rebuild: bool,
    },

    /// Answer one coverage question and print the JSON response.
    Ask {
        query: String,
    },

    /// Search the policy without calling the language model.
    Search {
        term: String,

        /// Number of passages (overrides `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Index the policy, then start the HTTP server.
    Serve {
        /// Policy document to index (overrides `index.source_document`).
        #[arg(long)]
        document: Option<PathBuf>,
    },

    /// Write the sample HealthPlus policy text.
    Seed {
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,intelliclaim=debug,sqlx=warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Index { document, rebuild } => {
            commands::run_index(&cfg, document, rebuild).await?;
        }
        Commands::Ask { query } => {
            commands::run_ask(&cfg, &query).await?;
        }
        Commands::Search { term, k } => {
            commands::run_search(&cfg, &term, k).await?;
        }
        Commands::Serve { document } => {
            commands::run_serve(&cfg, document).await?;
        }
        Commands::Seed { path } => {
            commands::run_seed(&cfg, path)?;
        }
    }

    Ok(())
}
