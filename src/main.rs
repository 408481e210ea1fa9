//! # Reference Indexer CLI (`rix`)
//!
//! The `rix` binary drives the reference code indexing pipeline and the
//! read-only query operations over the persisted indexes.
//!
//! ## Usage
//!
//! ```bash
//! rix --config ./config/rix.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rix index --target-structure plan.txt` | Index every reference repository |
//! | `rix index --target-structure plan.txt --repo NAME` | Index one repository |
//! | `rix search "<query>"` | Search persisted relationships |
//! | `rix overview` | Summarize all persisted indexes |
//!
//! ## Examples
//!
//! ```bash
//! # Index the whole code base against a planned project structure
//! rix index --target-structure plan.txt --config ./config/rix.toml
//!
//! # Re-index a single repository (replaces its prior index)
//! rix index --target-structure plan.txt --repo whisper-finetune
//!
//! # Search across all persisted indexes
//! rix search "streaming audio decoder" --top-k 5
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ref_indexer::{config, indexer, query};

/// Reference Indexer CLI — budget-aware indexing and retrieval for
/// reference code repositories.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rix.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rix",
    about = "Reference Indexer — budget-aware indexing and retrieval for reference code repositories",
    version,
    long_about = "Reference Indexer scans reference code repositories, narrows them with \
    reasoning-oracle filtering stages sized by a prompt budget guard, analyzes the surviving \
    files, maps scored relationships to a target project structure, and persists one JSON \
    index per repository for read-only retrieval."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rix.toml`. All scan, analysis, oracle, and
    /// path settings are read from this file.
    #[arg(long, global = true, default_value = "./config/rix.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Index reference repositories against a target project structure.
    ///
    /// Runs the full pipeline (scan, budget guard, filtering, analysis,
    /// relationship mapping) for every repository under the configured
    /// code base, writing one `<repo>_index.json` per repository plus a
    /// batch summary report. Re-running replaces prior indexes.
    Index {
        /// Path to a text file holding the target project structure.
        ///
        /// Either a bare file tree or a planning document containing the
        /// tree in a fenced code block.
        #[arg(long)]
        target_structure: PathBuf,

        /// Index only this repository (a directory name under the code base).
        #[arg(long)]
        repo: Option<String>,
    },

    /// Search persisted relationships for a free-text query.
    ///
    /// Matches query tokens against relationship paths and analyzed file
    /// summaries, ranked by relationship type then confidence. Read-only;
    /// never triggers indexing.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },

    /// Summarize all persisted indexes.
    ///
    /// Prints per-repository and aggregate counts of indexed files,
    /// relationships, and high-confidence relationships.
    Overview,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index {
            target_structure,
            repo,
        } => indexer::run_index(&cfg, &target_structure, repo).await,
        Commands::Search { query, top_k } => query::run_search(&cfg, &query, top_k),
        Commands::Overview => query::run_overview(&cfg),
    }
}
