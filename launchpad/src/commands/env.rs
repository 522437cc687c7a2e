//! `launchpad env` - inspect and expire cached environments.

use crate::context::Context;
use crate::output::Output;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::fs;
use std::time::Duration;

#[derive(Debug, Args)]
pub struct EnvArgs {
    #[command(subcommand)]
    pub action: EnvAction,
}

#[derive(Debug, Subcommand)]
pub enum EnvAction {
    /// List cached environments
    List,
    /// Remove environments unused for longer than the given age
    Clean {
        /// Age threshold in days
        #[arg(long = "older-than", default_value_t = 30)]
        older_than_days: u64,
    },
}

pub async fn run(ctx: &Context, args: EnvArgs) -> Result<i32> {
    match args.action {
        EnvAction::List => list(ctx),
        EnvAction::Clean { older_than_days } => clean(ctx, older_than_days),
    }
}

fn list(ctx: &Context) -> Result<i32> {
    let cache = ctx.env_cache();
    let entries = cache.cold_entries()?;
    if entries.is_empty() {
        Output::info("no cached environments");
        return Ok(0);
    }
    for entry in entries {
        let valid = entry.env_dir.is_dir();
        Output::step(format!(
            "{}  {}  {}",
            &entry.fingerprint[..12.min(entry.fingerprint.len())],
            entry.manifest_path.display(),
            if valid { "ok" } else { "missing env dir" }
        ));
    }
    Ok(0)
}

/// Remove env dirs whose cache entry aged out. The user-global environment
/// lives outside `envs/` and is never a candidate.
fn clean(ctx: &Context, older_than_days: u64) -> Result<i32> {
    let cache = ctx.env_cache();
    let older_than = Duration::from_secs(older_than_days * 24 * 60 * 60);

    if ctx.dry_run {
        let cutoff = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .saturating_sub(older_than.as_secs());
        for entry in cache.cold_entries()? {
            if entry.last_used_at < cutoff {
                Output::dry_run(format!("Would remove {}", entry.env_dir.display()));
            }
        }
        return Ok(0);
    }

    let removed = cache.gc(older_than)?;
    for entry in &removed {
        if entry.env_dir.starts_with(ctx.layout.envs_dir()) && entry.env_dir.exists() {
            fs::remove_dir_all(&entry.env_dir)?;
        }
    }
    Output::success(format!("Removed {} environments", removed.len()));
    Ok(0)
}
