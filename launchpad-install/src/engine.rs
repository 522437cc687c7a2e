//! The install engine.
//!
//! Drives the resolver, the registry, and the package store to realize a
//! resolution on disk, then materializes the per-environment `bin/`
//! directory and records the result in the env cache. Fetches run
//! concurrently up to a bounded parallelism; the environment is only linked
//! once every required store entry is visible.

use crate::env_cache::EnvCache;
use crate::error::InstallError;
use crate::fingerprint::Fingerprint;
use crate::manifest::Manifest;
use crate::paths::Layout;
use crate::platform::{Os, Platform};
use crate::registry::PackageRegistry;
use crate::resolver::{self, Resolution, ResolvedPackage, ResolverOptions};
use crate::store::PackageStore;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_PARALLELISM: usize = 8;
const FETCH_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 200;

/// Sidecar file inside each env dir recording which manifest produced it.
pub const ENV_MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvManifestRecord {
    pub manifest_path: PathBuf,
    pub manifest_mtime: u64,
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Re-download and re-insert packages already present in the store.
    pub force: bool,
    /// Materialize `bin/` entries only for these domains. `Some` with an
    /// empty set warms the store without exposing any binaries.
    pub expose_only: Option<BTreeSet<String>>,
    /// Concurrent fetches; 0 means the default of 8.
    pub max_parallel: usize,
}

#[derive(Debug)]
pub struct InstallOutcome {
    pub fingerprint: Fingerprint,
    pub env_dir: PathBuf,
    /// Basenames materialized into `env_dir/bin`.
    pub binaries: Vec<String>,
    pub fetched_packages: usize,
    pub fetched_bytes: u64,
    pub resolution: Resolution,
}

pub struct InstallEngine<'a> {
    registry: &'a dyn PackageRegistry,
    layout: Layout,
    store: PackageStore,
    platform: Platform,
    cancel: Arc<AtomicBool>,
}

impl<'a> InstallEngine<'a> {
    pub fn new(registry: &'a dyn PackageRegistry, layout: Layout, platform: Platform) -> Self {
        let store = PackageStore::new(layout.pkgs_dir());
        Self {
            registry,
            layout,
            store,
            platform,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag observed at every fetch boundary; set it from a signal
    /// handler to abort an in-flight install.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Observe an externally-owned cancellation flag instead of the
    /// engine's own.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &PackageStore {
        &self.store
    }

    /// Realize `manifest` on disk and return the activated-environment
    /// description. Idempotent: a second run over unchanged inputs performs
    /// no writes under the store or the env dir, so every mtime there stays
    /// put; only the cache entry is refreshed.
    pub async fn install(
        &self,
        manifest: &Manifest,
        manifest_path: &Path,
        resolver_options: &ResolverOptions,
        options: &InstallOptions,
        cache: &EnvCache,
    ) -> Result<InstallOutcome, InstallError> {
        let resolution = resolver::resolve(
            manifest,
            self.registry,
            self.platform,
            resolver_options,
        )
        .await?;

        let (fetched_packages, fetched_bytes) =
            self.populate_store(&resolution, options).await?;

        let fingerprint = Fingerprint::compute(manifest, self.platform);
        let env_dir = if manifest.global {
            self.layout.global_env_dir()
        } else {
            self.layout.env_dir(fingerprint.as_str())
        };

        let binaries = self.materialize_bin(&resolution, &env_dir, options)?;
        self.write_env_record(&env_dir, manifest_path)?;

        cache.remember(&fingerprint, &env_dir, manifest_path)?;

        info!(
            fingerprint = %fingerprint,
            packages = resolution.packages.len(),
            fetched = fetched_packages,
            "install complete"
        );

        Ok(InstallOutcome {
            fingerprint,
            env_dir,
            binaries,
            fetched_packages,
            fetched_bytes,
            resolution,
        })
    }

    /// Fetch and insert every resolved package not already in the store,
    /// bounded-parallel. Insertion order is immaterial; visibility is
    /// atomic per entry.
    async fn populate_store(
        &self,
        resolution: &Resolution,
        options: &InstallOptions,
    ) -> Result<(usize, u64), InstallError> {
        let mut missing: Vec<&ResolvedPackage> = Vec::new();
        for package in &resolution.packages {
            let version = package.version.to_string();
            if options.force {
                self.store.remove(&package.domain, &version)?;
            }
            if !self.store.contains(&package.domain, &version) {
                missing.push(package);
            }
        }

        let parallelism = if options.max_parallel == 0 {
            DEFAULT_PARALLELISM
        } else {
            options.max_parallel
        };

        let results: Vec<Result<u64, InstallError>> = stream::iter(
            missing
                .iter()
                .map(|package| self.fetch_and_insert(package)),
        )
        .buffer_unordered(parallelism)
        .collect()
        .await;

        let mut fetched_bytes = 0;
        for result in results {
            fetched_bytes += result?;
        }
        Ok((missing.len(), fetched_bytes))
    }

    async fn fetch_and_insert(&self, package: &ResolvedPackage) -> Result<u64, InstallError> {
        let mut last_error = String::new();
        for attempt in 1..=FETCH_ATTEMPTS {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(InstallError::Cancelled);
            }

            match self.registry.fetch_artifact(&package.artifact).await {
                Ok(bytes) => {
                    let size = bytes.len() as u64;
                    let store = self.store.clone();
                    let package = package.clone();
                    return tokio::task::spawn_blocking(move || {
                        store.insert(
                            &package.domain,
                            &package.version.to_string(),
                            package.kind,
                            &package.artifact.url,
                            &package.artifact.digest,
                            &bytes,
                            &package.programs,
                        )
                    })
                    .await
                    .map_err(|err| InstallError::Registry(err.to_string()))?
                    .map(|_| size);
                }
                Err(err @ InstallError::Cancelled) => return Err(err),
                Err(err) => {
                    last_error = err.to_string();
                    debug!(
                        domain = %package.domain,
                        attempt,
                        error = %last_error,
                        "artifact fetch failed"
                    );
                    if attempt < FETCH_ATTEMPTS {
                        let backoff =
                            Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(InstallError::FetchFailed {
            package: package.domain.clone(),
            attempts: FETCH_ATTEMPTS,
            message: last_error,
        })
    }

    /// Reconcile `env_dir/bin` with the runtime packages in topological
    /// order. Name collisions resolve to the later package; packages whose
    /// store entry declares library paths get a shim instead of a symlink.
    /// Entries already in the desired state are left alone, so an unchanged
    /// install moves no mtimes under the env dir.
    fn materialize_bin(
        &self,
        resolution: &Resolution,
        env_dir: &Path,
        options: &InstallOptions,
    ) -> Result<Vec<String>, InstallError> {
        let bin_dir = env_dir.join("bin");
        fs::create_dir_all(&bin_dir)?;

        let mut owners: Vec<(String, String)> = Vec::new();
        let mut desired: BTreeMap<String, DesiredEntry> = BTreeMap::new();
        for package in resolution.runtime_packages() {
            if let Some(only) = &options.expose_only {
                if !only.contains(&package.domain) {
                    continue;
                }
            }
            let version = package.version.to_string();
            let entry = self
                .store
                .get(&package.domain, &version)?
                .ok_or_else(|| InstallError::Registry(format!(
                    "store entry missing for {}@{version}",
                    package.domain
                )))?;

            for relative in &entry.metadata.binaries {
                let name = Path::new(relative)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| relative.clone());

                if let Some((_, loser)) = owners
                    .iter()
                    .find(|(existing, _)| *existing == name)
                {
                    warn!(
                        binary = %name,
                        loser = %loser,
                        winner = %package.domain,
                        "binary name collision; later package wins"
                    );
                }

                let target = entry.binary_path(relative);
                let want = if entry.metadata.library_paths.is_empty() {
                    DesiredEntry::Symlink(target)
                } else {
                    let library_dirs: Vec<PathBuf> = entry
                        .metadata
                        .library_paths
                        .iter()
                        .map(|dir| entry.path.join(dir))
                        .collect();
                    DesiredEntry::Shim(self.shim_script(&target, &library_dirs, &name)?)
                };
                desired.insert(name.clone(), want);

                owners.retain(|(existing, _)| *existing != name);
                owners.push((name, package.domain.clone()));
            }
        }

        // Entries no longer wanted go first.
        for dirent in fs::read_dir(&bin_dir)? {
            let path = dirent?.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !desired.contains_key(&name) {
                fs::remove_file(&path)?;
            }
        }

        // Create or replace only what differs from the desired state.
        for (name, want) in &desired {
            let link = bin_dir.join(name);
            match want {
                DesiredEntry::Symlink(target) => {
                    if fs::read_link(&link)
                        .map(|existing| existing == *target)
                        .unwrap_or(false)
                    {
                        continue;
                    }
                    if link.symlink_metadata().is_ok() {
                        fs::remove_file(&link)?;
                    }
                    if let Err(err) = symlink(target, &link) {
                        debug!(binary = %name, error = %err, "symlink failed, writing shim");
                        let script = self.shim_script(target, &[], name)?;
                        write_shim_file(&link, &script, name)?;
                    }
                }
                DesiredEntry::Shim(script) => {
                    let is_symlink = link
                        .symlink_metadata()
                        .map(|meta| meta.file_type().is_symlink())
                        .unwrap_or(false);
                    if !is_symlink
                        && fs::read_to_string(&link)
                            .map(|existing| existing == *script)
                            .unwrap_or(false)
                    {
                        continue;
                    }
                    if link.symlink_metadata().is_ok() {
                        fs::remove_file(&link)?;
                    }
                    write_shim_file(&link, script, name)?;
                }
            }
        }

        Ok(owners.into_iter().map(|(name, _)| name).collect())
    }

    /// A shim is a tiny launcher used where a plain symlink is inadequate:
    /// it exports the package's library search paths and execs the real
    /// binary.
    fn shim_script(
        &self,
        target: &Path,
        library_dirs: &[PathBuf],
        name: &str,
    ) -> Result<String, InstallError> {
        let quoted_target = shlex::try_quote(&target.to_string_lossy())
            .map_err(|err| InstallError::LinkFailed {
                name: name.to_string(),
                message: err.to_string(),
            })?
            .into_owned();

        let mut script = String::from("#!/bin/sh\n# Generated by launchpad\n");
        if !library_dirs.is_empty() {
            let joined = library_dirs
                .iter()
                .map(|dir| dir.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(":");
            let var = match self.platform.os {
                Os::MacOs => "DYLD_FALLBACK_LIBRARY_PATH",
                Os::Linux => "LD_LIBRARY_PATH",
            };
            script.push_str(&format!(
                "{var}=\"{joined}${{{var}:+:${var}}}\" export {var}\n"
            ));
        }
        script.push_str(&format!("exec {quoted_target} \"$@\"\n"));
        Ok(script)
    }

    /// Refresh the sidecar record only when its content would change; an
    /// untouched manifest leaves the file's mtime alone.
    fn write_env_record(&self, env_dir: &Path, manifest_path: &Path) -> Result<(), InstallError> {
        let mtime = fs::metadata(manifest_path)?
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let record = EnvManifestRecord {
            manifest_path: manifest_path.to_path_buf(),
            manifest_mtime: mtime,
        };

        let path = env_dir.join(ENV_MANIFEST_FILE);
        if let Ok(content) = fs::read_to_string(&path) {
            if let Ok(existing) = serde_json::from_str::<EnvManifestRecord>(&content) {
                if existing == record {
                    return Ok(());
                }
            }
        }

        let json =
            serde_json::to_vec_pretty(&record).map_err(launchpad_common::CommonError::from)?;
        launchpad_common::fsx::write_atomic(&path, &json)?;
        Ok(())
    }
}

/// What one `bin/` entry should look like after reconciliation.
enum DesiredEntry {
    Symlink(PathBuf),
    Shim(String),
}

fn write_shim_file(link: &Path, script: &str, name: &str) -> Result<(), InstallError> {
    fs::write(link, script).map_err(|err| InstallError::LinkFailed {
        name: name.to_string(),
        message: err.to_string(),
    })?;
    launchpad_common::archive::set_executable(link).map_err(|err| InstallError::LinkFailed {
        name: name.to_string(),
        message: err.to_string(),
    })?;
    Ok(())
}

fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(not(unix))]
    {
        let _ = (target, link);
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "symlinks unsupported on this platform",
        ))
    }
}
