//! The content-addressed package store.
//!
//! Entries live at `{prefix}/pkgs/{domain}/v{version}/`. The on-disk layout
//! is the ground truth: an entry exists iff its `metadata.json` exists, and
//! once that file is present the entry is complete and immutable. Insertion
//! stages into a `.partial.{nonce}` sibling and renames at the end, so
//! concurrent installers and crashes never expose half-written entries.

use crate::error::InstallError;
use crate::registry::DepKind;
use launchpad_common::{archive, checksum, fsx};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

pub const METADATA_FILE: &str = "metadata.json";

static STAGING_NONCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreMetadata {
    pub domain: String,
    pub version: String,
    /// Relative paths inside the entry that belong on `PATH`.
    pub binaries: Vec<String>,
    /// Relative directories holding shared libraries, for shim generation.
    pub library_paths: Vec<String>,
    pub installed_at: String,
    pub artifact_digest: String,
    pub kind: String,
}

impl StoreMetadata {
    pub fn dep_kind(&self) -> DepKind {
        if self.kind == "buildtime" {
            DepKind::Buildtime
        } else {
            DepKind::Runtime
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub path: PathBuf,
    pub metadata: StoreMetadata,
}

impl StoreEntry {
    /// Absolute path of one of this entry's binaries.
    pub fn binary_path(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }
}

#[derive(Debug, Clone)]
pub struct PackageStore {
    root: PathBuf,
}

impl PackageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, domain: &str, version: &str) -> PathBuf {
        self.root.join(domain).join(format!("v{version}"))
    }

    /// An entry is present iff its metadata file exists.
    pub fn contains(&self, domain: &str, version: &str) -> bool {
        self.entry_dir(domain, version).join(METADATA_FILE).is_file()
    }

    pub fn get(&self, domain: &str, version: &str) -> Result<Option<StoreEntry>, InstallError> {
        let dir = self.entry_dir(domain, version);
        read_entry(&dir)
    }

    /// Insert an artifact's bytes as a complete entry.
    ///
    /// The digest is verified after extraction and before the metadata file
    /// is written; a mismatch deletes the staging directory. Losing the
    /// final rename race to a concurrent installer counts as success.
    pub fn insert(
        &self,
        domain: &str,
        version: &str,
        kind: DepKind,
        artifact_name: &str,
        expected_digest: &str,
        bytes: &[u8],
        programs: &[String],
    ) -> Result<StoreEntry, InstallError> {
        let target = self.entry_dir(domain, version);
        if target.join(METADATA_FILE).is_file() {
            debug!(domain, version, "store entry already present");
            return Ok(read_entry(&target)?.expect("metadata file just checked"));
        }

        let nonce = STAGING_NONCE.fetch_add(1, Ordering::Relaxed);
        let staging = self.root.join(domain).join(format!(
            "v{version}.partial.{}-{nonce}",
            process::id()
        ));
        fs::create_dir_all(&staging)?;

        let result = self.populate_staging(
            domain,
            version,
            kind,
            artifact_name,
            expected_digest,
            bytes,
            programs,
            &staging,
        );
        if let Err(err) = result {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }

        fsx::commit_dir(&staging, &target)?;
        Ok(read_entry(&target)?.expect("entry committed"))
    }

    #[allow(clippy::too_many_arguments)]
    fn populate_staging(
        &self,
        domain: &str,
        version: &str,
        kind: DepKind,
        artifact_name: &str,
        expected_digest: &str,
        bytes: &[u8],
        programs: &[String],
        staging: &Path,
    ) -> Result<(), InstallError> {
        archive::extract_artifact(artifact_name, bytes, staging, 0)?;

        checksum::verify_sha256(bytes, expected_digest).map_err(|err| {
            InstallError::CorruptArtifact {
                package: format!("{domain}@{version}"),
                message: err.to_string(),
            }
        })?;

        let binaries = discover_binaries(staging, programs);
        if binaries.len() < programs.len() {
            warn!(
                domain,
                version,
                expected = programs.len(),
                found = binaries.len(),
                "some declared programs missing from artifact"
            );
        }
        for binary in &binaries {
            archive::set_executable(&staging.join(binary))?;
        }

        let library_paths = ["lib", "lib64"]
            .into_iter()
            .filter(|dir| staging.join(dir).is_dir())
            .map(str::to_string)
            .collect();

        let metadata = StoreMetadata {
            domain: domain.to_string(),
            version: version.to_string(),
            binaries,
            library_paths,
            installed_at: chrono::Utc::now().to_rfc3339(),
            artifact_digest: expected_digest.to_string(),
            kind: match kind {
                DepKind::Runtime => "runtime".to_string(),
                DepKind::Buildtime => "buildtime".to_string(),
            },
        };
        let json = serde_json::to_vec_pretty(&metadata)
            .map_err(launchpad_common::CommonError::from)?;
        fs::write(staging.join(METADATA_FILE), json)?;
        Ok(())
    }

    /// All complete entries, for cleanup and reporting.
    pub fn entries(&self) -> Result<Vec<StoreEntry>, InstallError> {
        let mut found = Vec::new();
        if self.root.is_dir() {
            collect_entries(&self.root, &mut found)?;
        }
        found.sort_by(|a, b| {
            (&a.metadata.domain, &a.metadata.version)
                .cmp(&(&b.metadata.domain, &b.metadata.version))
        });
        Ok(found)
    }

    pub fn remove(&self, domain: &str, version: &str) -> Result<(), InstallError> {
        let dir = self.entry_dir(domain, version);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Delete staging remnants left behind by crashed installers.
    pub fn clean_staging(&self) -> Result<usize, InstallError> {
        let mut removed = 0;
        if self.root.is_dir() {
            clean_staging_in(&self.root, &mut removed)?;
        }
        Ok(removed)
    }
}

fn read_entry(dir: &Path) -> Result<Option<StoreEntry>, InstallError> {
    let metadata_path = dir.join(METADATA_FILE);
    let content = match fs::read_to_string(&metadata_path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let metadata: StoreMetadata =
        serde_json::from_str(&content).map_err(launchpad_common::CommonError::from)?;
    Ok(Some(StoreEntry {
        path: dir.to_path_buf(),
        metadata,
    }))
}

fn collect_entries(dir: &Path, found: &mut Vec<StoreEntry>) -> Result<(), InstallError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        if let Some(loaded) = read_entry(&path)? {
            found.push(loaded);
        } else {
            // Either a domain segment or a staging remnant; recurse into
            // domain segments only.
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.contains(".partial.") {
                collect_entries(&path, found)?;
            }
        }
    }
    Ok(())
}

fn clean_staging_in(dir: &Path, removed: &mut usize) -> Result<(), InstallError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if name.to_string_lossy().contains(".partial.") {
            fs::remove_dir_all(entry.path())?;
            *removed += 1;
        } else {
            clean_staging_in(&entry.path(), removed)?;
        }
    }
    Ok(())
}

/// Map declared program names to relative paths inside the entry, checking
/// `bin/{name}` first and the entry root second.
fn discover_binaries(root: &Path, programs: &[String]) -> Vec<String> {
    let mut binaries = Vec::new();
    for program in programs {
        let under_bin = format!("bin/{program}");
        if root.join(&under_bin).is_file() {
            binaries.push(under_bin);
        } else if root.join(program).is_file() {
            binaries.push(program.clone());
        }
    }
    binaries
}
