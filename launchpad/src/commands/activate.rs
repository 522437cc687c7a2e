//! `launchpad activate <pwd>` - the write side of the shell wire protocol.
//!
//! On a cache hit this only prints the export script. On a miss it resolves
//! and installs first (progress on stderr), then prints the script. Stdout
//! stays machine-consumable either way: the shell hook `eval`s it verbatim.

use crate::commands::install::install_manifest;
use crate::context::Context;
use crate::output::Output;
use anyhow::Result;
use launchpad_install::{activation, manifest, Manifest};
use std::path::{Path, PathBuf};
use tracing::debug;

pub async fn run(ctx: &Context, pwd: PathBuf) -> Result<i32> {
    maybe_refresh_global(ctx).await;

    let cache = ctx.env_cache();
    if let Some((env_dir, project_dir)) = cache.lookup(&pwd) {
        cache_refresh(ctx, &cache, &env_dir, &project_dir);
        print_script(&project_dir, &env_dir);
        return Ok(0);
    }

    let Some((manifest_path, project_dir)) = manifest::discover(&pwd) else {
        Output::error(format!(
            "no dependency manifest found walking up from {}",
            pwd.display()
        ));
        return Ok(1);
    };

    if !ctx.config.install_dependencies {
        Output::error("environment not installed and installDependencies is disabled");
        return Ok(1);
    }

    let parsed = match Manifest::load(&manifest_path) {
        Ok(parsed) => parsed,
        Err(err) => {
            Output::error(format!("{err}"));
            return Ok(1);
        }
    };

    Output::info(format!("Preparing environment for {}", project_dir.display()));
    let outcome = install_manifest(ctx, &parsed, &manifest_path, false, false).await?;
    print_script(&project_dir, &outcome.env_dir);
    Ok(0)
}

/// A hit means the environment was just used; refresh `last_used_at` so GC
/// ages from activity, not creation.
fn cache_refresh(
    ctx: &Context,
    cache: &launchpad_install::env_cache::EnvCache,
    env_dir: &Path,
    project_dir: &Path,
) {
    if let Some((manifest_path, _)) = manifest::discover(project_dir) {
        if let Ok(parsed) = Manifest::load(&manifest_path) {
            let fingerprint = launchpad_install::Fingerprint::compute(&parsed, ctx.platform);
            if let Err(err) = cache.remember(&fingerprint, env_dir, &manifest_path) {
                debug!(error = %err, "failed to refresh cache entry");
            }
        }
    }
}

/// The user-global environment is rebuilt when its manifest changed since
/// capture. Scanning is skipped under `LAUNCHPAD_SKIP_GLOBAL_AUTO_SCAN`;
/// the rebuild itself additionally requires `LAUNCHPAD_AUTO_UPDATE_GLOBALS`.
async fn maybe_refresh_global(ctx: &Context) {
    if std::env::var("LAUNCHPAD_SKIP_GLOBAL_AUTO_SCAN").as_deref() == Ok("1") {
        return;
    }
    let record_path = ctx
        .layout
        .global_env_dir()
        .join(launchpad_install::engine::ENV_MANIFEST_FILE);
    let Ok(content) = std::fs::read_to_string(&record_path) else {
        return;
    };
    let Ok(record) =
        serde_json::from_str::<launchpad_install::engine::EnvManifestRecord>(&content)
    else {
        return;
    };
    let Ok(meta) = std::fs::metadata(&record.manifest_path) else {
        return;
    };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or_default();
    if mtime == record.manifest_mtime {
        return;
    }

    if std::env::var("LAUNCHPAD_AUTO_UPDATE_GLOBALS").as_deref() != Ok("1") {
        debug!("global manifest changed; set LAUNCHPAD_AUTO_UPDATE_GLOBALS=1 to auto-update");
        return;
    }
    if let Ok(parsed) = Manifest::load(&record.manifest_path) {
        Output::info("Updating global environment");
        if let Err(err) = install_manifest(ctx, &parsed, &record.manifest_path, false, false).await
        {
            Output::warning(format!("global update failed: {err}"));
        }
    }
}

fn print_script(project_dir: &Path, env_dir: &Path) {
    let current_path = std::env::var("PATH").unwrap_or_default();
    let previous_bin = std::env::var(activation::ENV_BIN_PATH).ok();
    print!(
        "{}",
        activation::activation_script(
            project_dir,
            env_dir,
            &current_path,
            previous_bin.as_deref(),
        )
    );
}
