//! `launchpad install` - realize the project manifest on disk.

use crate::commands::registry_url;
use crate::context::Context;
use crate::output::Output;
use anyhow::{bail, Context as _, Result};
use clap::Args;
use launchpad_install::engine::{InstallEngine, InstallOptions, InstallOutcome};
use launchpad_install::registry::HttpRegistry;
use launchpad_install::resolver::ResolverOptions;
use launchpad_install::{manifest, Manifest};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Project directory (defaults to the current directory)
    pub path: Option<PathBuf>,

    /// Re-download packages even when already in the store
    #[arg(long)]
    pub force: bool,

    /// Warm the package store without exposing any binaries
    #[arg(long = "deps-only")]
    pub deps_only: bool,
}

pub async fn run(ctx: &Context, args: InstallArgs) -> Result<i32> {
    let start_dir = match args.path {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let Some((manifest_path, project_dir)) = manifest::discover(&start_dir) else {
        bail!(
            "no dependency manifest found walking up from {}",
            start_dir.display()
        );
    };
    let parsed = Manifest::load(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;

    if ctx.dry_run {
        Output::dry_run(format!(
            "Would install {} dependencies from {}",
            parsed.dependencies.len(),
            manifest_path.display()
        ));
        return Ok(0);
    }

    let spinner = Output::spinner(format!("Installing {}...", project_dir.display()));
    let outcome = install_manifest(ctx, &parsed, &manifest_path, args.force, args.deps_only)
        .await
        .inspect_err(|_| spinner.finish_and_clear())?;
    spinner.finish_and_clear();

    if parsed.global {
        expose_global(ctx, &outcome)?;
    }

    if std::env::var("LAUNCHPAD_SUPPRESS_INSTALL_SUMMARY").as_deref() != Ok("1") {
        Output::success(format!(
            "Installed {} packages ({} fetched, {} KiB downloaded)",
            outcome.resolution.packages.len(),
            outcome.fetched_packages,
            outcome.fetched_bytes / 1024
        ));
        Output::kv("Environment", outcome.env_dir.display().to_string());
        Output::kv("Fingerprint", outcome.fingerprint.project_hash());
        if !outcome.binaries.is_empty() {
            Output::kv("Binaries", outcome.binaries.join(", "));
        }
    }
    Ok(0)
}

/// Global installs can mirror their binaries into `shimPath` (a directory
/// the user keeps on `PATH` permanently); with `autoAddToPath` off we only
/// hint instead.
fn expose_global(ctx: &Context, outcome: &InstallOutcome) -> Result<()> {
    let bin_dir = outcome.env_dir.join("bin");
    if let Some(shim_path) = &ctx.config.shim_path {
        std::fs::create_dir_all(shim_path)?;
        for name in &outcome.binaries {
            let link = shim_path.join(name);
            if link.symlink_metadata().is_ok() {
                std::fs::remove_file(&link)?;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(bin_dir.join(name), &link)?;
        }
        Output::kv("Shims", shim_path.display().to_string());
    } else if ctx.config.auto_add_to_path {
        Output::info(format!(
            "Add {} to your PATH to use the global environment",
            bin_dir.display()
        ));
    }
    Ok(())
}

/// Shared install path used by both `install` and `activate`.
pub async fn install_manifest(
    ctx: &Context,
    parsed: &Manifest,
    manifest_path: &std::path::Path,
    force: bool,
    deps_only: bool,
) -> Result<InstallOutcome> {
    let registry = HttpRegistry::new(registry_url());
    let engine = InstallEngine::new(&registry, ctx.layout.clone(), ctx.platform)
        .with_cancel(ctx.cancel.clone());
    let cache = ctx.env_cache();

    let mut resolver_options = ResolverOptions::from_env();
    resolver_options.exclude = ctx.exclusions(parsed).into_iter().collect();

    let options = InstallOptions {
        force: force || ctx.config.force_reinstall,
        expose_only: deps_only.then(BTreeSet::new),
        max_parallel: 0,
    };

    let outcome = engine
        .install(parsed, manifest_path, &resolver_options, &options, &cache)
        .await?;
    Ok(outcome)
}
