//! vault-insight binary library.
//!
//! # Modules
//!
//! - `cli`: command-line parsing with clap
//! - `vault`: directory-walking vault reader
//! - `app`: wiring stores, caches, router and pipeline from `Settings`
//! - `commands`: subcommand implementations

pub mod app;
pub mod cli;
pub mod commands;
pub mod vault;

pub use app::{App, OfflineProvider};
pub use cli::{CacheCommands, Cli, Commands, IndexCommands, ReviewCommands};
pub use commands::{handle_cache, handle_index, handle_review, run_once, run_scheduled};
pub use vault::{strip_front_matter, DirVault};
