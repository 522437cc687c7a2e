//! `launchpad clean` - remove installed state.
//!
//! The plan is computed once and then either printed (`--dry-run`) or
//! executed, so a dry run reports exactly the set a real run would remove.

use crate::context::Context;
use crate::output::Output;
use crate::services::supervisor::Supervisor;
use crate::services::{catalog, ServiceError};
use anyhow::Result;
use clap::Args;
use launchpad_common::fsx;
use launchpad_install::{Os, PackageStore, StoreEntry};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Preserve the user-global environment and the packages it references
    #[arg(long = "keep-global")]
    pub keep_global: bool,

    /// Preserve the environment cache directory
    #[arg(long = "keep-cache")]
    pub keep_cache: bool,
}

#[derive(Debug, Default)]
struct CleanPlan {
    service_units: Vec<PathBuf>,
    env_dirs: Vec<PathBuf>,
    store_entries: Vec<StoreEntry>,
    cache_dir: Option<PathBuf>,
    total_bytes: u64,
    total_files: u64,
}

pub async fn run(ctx: &Context, args: CleanArgs) -> Result<i32> {
    let plan = compute_plan(ctx, &args)?;

    if ctx.dry_run {
        report(&plan);
        return Ok(0);
    }

    execute(ctx, &plan).await?;
    Output::success(format!(
        "Removed {} store entries, {} environments, {} service units ({} KiB, {} files)",
        plan.store_entries.len(),
        plan.env_dirs.len(),
        plan.service_units.len(),
        plan.total_bytes / 1024,
        plan.total_files
    ));
    Ok(0)
}

fn compute_plan(ctx: &Context, args: &CleanArgs) -> Result<CleanPlan> {
    let mut plan = CleanPlan::default();
    let store = PackageStore::new(ctx.layout.pkgs_dir());

    let kept_entries = if args.keep_global {
        global_store_refs(ctx, &store)?
    } else {
        BTreeSet::new()
    };
    let kept_domains: BTreeSet<String> = kept_entries
        .iter()
        .map(|(domain, _)| domain.clone())
        .collect();

    for entry in store.entries()? {
        let key = (entry.metadata.domain.clone(), entry.metadata.version.clone());
        if !kept_entries.contains(&key) {
            let (bytes, files) = fsx::dir_size(&entry.path);
            plan.total_bytes += bytes;
            plan.total_files += files;
            plan.store_entries.push(entry);
        }
    }

    let envs_dir = ctx.layout.envs_dir();
    if envs_dir.is_dir() {
        for dirent in fs::read_dir(&envs_dir)? {
            let path = dirent?.path();
            let (bytes, files) = fsx::dir_size(&path);
            plan.total_bytes += bytes;
            plan.total_files += files;
            plan.env_dirs.push(path);
        }
    }
    if !args.keep_global {
        let global = ctx.layout.global_env_dir();
        if global.is_dir() {
            let (bytes, files) = fsx::dir_size(&global);
            plan.total_bytes += bytes;
            plan.total_files += files;
            plan.env_dirs.push(global);
        }
    }

    plan.service_units = service_units_to_remove(ctx, &kept_domains)?;

    if !args.keep_cache {
        let cache_root = ctx.layout.cache_root().to_path_buf();
        if cache_root.is_dir() {
            let (bytes, files) = fsx::dir_size(&cache_root);
            plan.total_bytes += bytes;
            plan.total_files += files;
            plan.cache_dir = Some(cache_root);
        }
    }

    Ok(plan)
}

/// Store entries the user-global environment still references, identified by
/// resolving the symlink targets under `global/bin`.
fn global_store_refs(
    ctx: &Context,
    store: &PackageStore,
) -> Result<BTreeSet<(String, String)>> {
    let mut kept = BTreeSet::new();
    let bin_dir = ctx.layout.global_env_dir().join("bin");
    let mut targets = Vec::new();
    if bin_dir.is_dir() {
        for dirent in fs::read_dir(&bin_dir)? {
            let path = dirent?.path();
            if let Ok(target) = fs::read_link(&path) {
                targets.push(target);
            }
        }
    }
    if targets.is_empty() {
        return Ok(kept);
    }

    for entry in store.entries()? {
        if targets.iter().any(|target| target.starts_with(&entry.path)) {
            kept.insert((entry.metadata.domain, entry.metadata.version));
        }
    }
    Ok(kept)
}

/// Unit files written by launchpad, minus services whose package stays.
fn service_units_to_remove(
    ctx: &Context,
    kept_domains: &BTreeSet<String>,
) -> Result<Vec<PathBuf>> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let (unit_dir, prefix, suffix) = match ctx.platform.os {
        Os::MacOs => (home.join("Library/LaunchAgents"), "com.launchpad.", ".plist"),
        Os::Linux => (
            home.join(".config/systemd/user"),
            "launchpad-",
            ".service",
        ),
    };

    let mut units = Vec::new();
    if !unit_dir.is_dir() {
        return Ok(units);
    }
    for dirent in fs::read_dir(&unit_dir)? {
        let path = dirent?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) || !name.ends_with(suffix) {
            continue;
        }
        let label = &name[prefix.len()..name.len() - suffix.len()];
        // Labels are `{name}` or `{hash}-{name}` / `{hash}.{name}`; the
        // service name is the last segment.
        let service = label
            .rsplit(['-', '.'])
            .next()
            .unwrap_or(label)
            .to_string();
        let domain = catalog()
            .into_iter()
            .find(|definition| definition.name == service)
            .map(|definition| definition.package_domain);
        if let Some(domain) = domain {
            if kept_domains.contains(&domain) {
                continue;
            }
        }
        units.push(path);
    }
    Ok(units)
}

fn report(plan: &CleanPlan) {
    for entry in &plan.store_entries {
        Output::dry_run(format!(
            "Would remove package {}@{}",
            entry.metadata.domain, entry.metadata.version
        ));
    }
    for dir in &plan.env_dirs {
        Output::dry_run(format!("Would remove environment {}", dir.display()));
    }
    for unit in &plan.service_units {
        Output::dry_run(format!("Would remove service unit {}", unit.display()));
    }
    if let Some(cache) = &plan.cache_dir {
        Output::dry_run(format!("Would remove cache {}", cache.display()));
    }
    Output::dry_run(format!(
        "Total: {} store entries, {} environments, {} service units ({} KiB, {} files)",
        plan.store_entries.len(),
        plan.env_dirs.len(),
        plan.service_units.len(),
        plan.total_bytes / 1024,
        plan.total_files
    ));
}

async fn execute(ctx: &Context, plan: &CleanPlan) -> Result<()> {
    // Stop services before deleting their units; a stop failure downgrades
    // to a diagnostic because the unit file removal is what matters here.
    let supervisor = Supervisor::new(ctx, None);
    for unit in &plan.service_units {
        if let Err(err) = stop_unit(ctx, &supervisor, unit).await {
            debug!(unit = %unit.display(), error = %err, "failed to stop service");
        }
        if unit.exists() {
            fs::remove_file(unit)?;
        }
    }

    for entry in &plan.store_entries {
        if entry.path.exists() {
            fs::remove_dir_all(&entry.path)?;
        }
    }
    for dir in &plan.env_dirs {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
    }
    if let Some(cache) = &plan.cache_dir {
        if cache.exists() {
            fs::remove_dir_all(cache)?;
        }
    }
    Ok(())
}

async fn stop_unit(
    ctx: &Context,
    supervisor: &Supervisor,
    unit: &std::path::Path,
) -> std::result::Result<(), ServiceError> {
    let Some(name) = unit.file_name().and_then(|n| n.to_str()) else {
        return Ok(());
    };
    match ctx.platform.os {
        Os::Linux => supervisor.manager_stop_unit(name).await,
        Os::MacOs => supervisor.manager_unload_plist(unit).await,
    }
}
