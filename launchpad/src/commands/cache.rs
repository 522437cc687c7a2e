//! `launchpad cache` - cold-tier cache management.

use crate::context::Context;
use crate::output::Output;
use anyhow::Result;
use clap::{Args, Subcommand};

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove the entire cold-tier cache directory
    Clear,
}

pub async fn run(ctx: &Context, args: CacheArgs) -> Result<i32> {
    match args.action {
        CacheAction::Clear => {
            if ctx.dry_run {
                Output::dry_run("Would remove the environment cache directory");
                return Ok(0);
            }
            ctx.env_cache().clear_all()?;
            Output::success("Environment cache cleared");
            Ok(0)
        }
    }
}
