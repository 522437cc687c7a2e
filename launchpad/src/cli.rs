//! CLI argument definitions.
//!
//! The clap-derived `Cli` and `Commands` types, separated from `main.rs` so
//! the dispatch and the integration tests can reference them.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "launchpad")]
#[command(about = "Per-project package and environment manager")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbose diagnostics on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Show what would be done without making changes
    #[arg(long, short = 'n', global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install the current project's dependencies
    Install(crate::commands::install::InstallArgs),

    /// Resolve a directory to a cached environment (shell hook wire call)
    Lookup {
        /// Directory to resolve, usually $PWD
        pwd: PathBuf,
    },

    /// Install if needed and print shell activation commands (wire call)
    Activate {
        /// Directory to activate, usually $PWD
        pwd: PathBuf,
    },

    /// Print the shell integration snippet
    Shellcode,

    /// Inspect and clean cached environments
    Env(crate::commands::env::EnvArgs),

    /// Manage the environment cache
    Cache(crate::commands::cache::CacheArgs),

    /// Remove installed packages, environments, and services
    Clean(crate::commands::clean::CleanArgs),

    /// Manage project services
    #[command(alias = "svc")]
    Service(crate::commands::service::ServiceArgs),

    /// Read and write configuration
    Config(crate::commands::config_cmd::ConfigArgs),
}
