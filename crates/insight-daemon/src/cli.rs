//! CLI argument parsing for vault-insight.
//!
//! Flags given here override every other configuration source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Turn a folder of markdown notes into linked, summarized insights.
#[derive(Parser, Debug)]
#[command(name = "vault-insight")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/vault-insight/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline over a vault once and print the report
    Run {
        /// Vault directory
        #[arg(long)]
        vault: PathBuf,

        /// Artifact directory (default: <vault>/.insights)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep running maintenance and recurring vault runs until Ctrl-C
    Schedule {
        #[arg(long)]
        vault: PathBuf,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Embedding and response cache maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Vector index maintenance
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },

    /// Human review of escalated items
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommands {
    /// Show embedding and response cache statistics
    Stats,

    /// Remove expired cached responses
    Sweep,

    /// Remove every cached embedding computed by a model
    Evict {
        /// Model identifier
        #[arg(long)]
        model: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum IndexCommands {
    /// Show index statistics
    Stats,

    /// Rebuild the index without tombstones
    Compact {
        /// Compact even below the tombstone threshold
        #[arg(long)]
        force: bool,
    },

    /// Measure recall@k of the graph against exact search
    Recall {
        /// Stored vectors used as queries
        #[arg(long, default_value = "100")]
        samples: usize,

        #[arg(short, long, default_value = "10")]
        k: usize,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ReviewCommands {
    /// List escalations waiting for an answer
    List,

    /// Answer an escalation; the answer is cached for similar prompts
    Resolve {
        /// Escalation id
        id: String,

        /// The answer
        answer: String,
    },
}
