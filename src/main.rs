//! # Scripture Sync CLI (`scripture-sync`)
//!
//! ## Usage
//!
//! ```bash
//! scripture-sync --config ./config/scripture-sync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `init` | Create the database and seed the sample verses |
//! | `import <file> --translation <T>` | Import a JSON verse file |
//! | `verses` | Browse the catalog |
//! | `index` | Embed and cache verse vectors |
//! | `match "<text>"` | Score a transcript against the catalog |
//! | `history` | Show recent transcription events |
//! | `serve` | Start the HTTP + WebSocket server |
//!
//! ## Examples
//!
//! ```bash
//! scripture-sync init
//! scripture-sync import ./data/kjv.json --translation KJV
//! scripture-sync match "the lord is my shepherd"
//! RUST_LOG=scripture_sync=debug scripture-sync serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scripture_sync::{commands, config, server};

/// Real-time verse matching for live transcripts.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Only `[db] path` is required.
#[derive(Parser)]
#[command(
    name = "scripture-sync",
    about = "Match spoken transcript fragments against a verse catalog and push the live selection to viewers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scripture-sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent. Seeds the bundled sample verses when the catalog is empty.
    Init {
        /// Skip seeding the sample verses.
        #[arg(long)]
        no_sample: bool,
    },

    /// Import verses from a JSON file.
    ///
    /// Accepts `{"books": [...]}` or `{"Book": {"chapter": {"verse": "text"}}}`.
    Import {
        file: PathBuf,

        /// Translation label stored with every imported verse (e.g. `KJV`).
        #[arg(long)]
        translation: String,

        /// Remove the translation's existing verses before importing.
        #[arg(long)]
        replace: bool,
    },

    /// List catalog verses.
    Verses {
        #[arg(long)]
        translation: Option<String>,

        #[arg(long)]
        book: Option<String>,

        #[arg(long, default_value_t = 0)]
        skip: i64,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Embed verses missing from the vector cache.
    ///
    /// Requires an embedding provider to be configured.
    Index,

    /// Score a transcript and print the best match. The live session is not
    /// involved.
    Match {
        text: String,

        /// Threshold override; defaults to `matching.search_min_score`.
        #[arg(long)]
        min_score: Option<f64>,

        /// Number of ranked candidates to print.
        #[arg(long, default_value_t = 1)]
        limit: usize,
    },

    /// Show recent transcription events.
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Start the HTTP and WebSocket server.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scripture_sync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { no_sample } => {
            commands::run_init(&cfg, !no_sample).await?;
        }
        Commands::Import {
            file,
            translation,
            replace,
        } => {
            commands::run_import(&cfg, &file, &translation, replace).await?;
        }
        Commands::Verses {
            translation,
            book,
            skip,
            limit,
        } => {
            commands::run_verses(&cfg, translation, book, skip, limit).await?;
        }
        Commands::Index => {
            commands::run_index(&cfg).await?;
        }
        Commands::Match {
            text,
            min_score,
            limit,
        } => {
            commands::run_match(&cfg, &text, min_score, limit).await?;
        }
        Commands::History { limit } => {
            commands::run_history(&cfg, limit).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
