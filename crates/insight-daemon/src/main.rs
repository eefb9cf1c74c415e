//! vault-insight
//!
//! Indexes a folder of markdown notes, links related notes, and produces
//! a summarized insight per note, spending model budget only where the
//! caches cannot answer.
//!
//! # Usage
//!
//! ```bash
//! vault-insight run --vault ~/notes [--out DIR] [--json]
//! vault-insight schedule --vault ~/notes
//! vault-insight cache stats|sweep|evict --model ID
//! vault-insight index stats|compact|recall
//! vault-insight review list|resolve ID ANSWER
//! vault-insight config
//! ```
//!
//! # Configuration
//!
//! Loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/vault-insight/config.toml)
//! 3. Environment variables (INSIGHT_*)
//! 4. CLI flags

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use insight_daemon::commands::{print_report, render_config};
use insight_daemon::{
    handle_cache, handle_index, handle_review, run_once, run_scheduled, App, Cli, Commands,
};
use insight_types::Settings;

fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db_path) = cli.db_path {
        settings.db_path = db_path;
    }
    if let Some(log_level) = cli.log_level {
        settings.log_level = log_level;
    }
    init_logging(&settings.log_level)?;

    if let Commands::Config = cli.command {
        print!("{}", render_config(&settings)?);
        return Ok(());
    }

    let app = App::open(settings)?;
    match cli.command {
        Commands::Run { vault, out, json } => {
            let report = run_once(&app, &vault, out.as_deref()).await?;
            print_report(&report, json)?;
        }
        Commands::Schedule { vault, out } => {
            run_scheduled(app, &vault, out.as_deref()).await?;
        }
        Commands::Cache { command } => handle_cache(&app, command)?,
        Commands::Index { command } => handle_index(&app, command)?,
        Commands::Review { command } => handle_review(&app, command).await?,
        Commands::Config => {}
    }

    Ok(())
}
