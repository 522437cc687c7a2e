//! Atomic filesystem primitives.
//!
//! Writers stage into a sibling temp path and rename into place; readers
//! never observe a half-written file. Used by the package store, the cold
//! cache tier, and service unit files.

use crate::error::CommonError;
use std::fs;
use std::path::Path;
use std::process;

/// Write `contents` to `path` atomically via a sibling temp file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CommonError> {
    let parent = path
        .parent()
        .ok_or_else(|| CommonError::Archive(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string()),
        process::id()
    ));
    fs::write(&tmp, contents)?;
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&tmp);
            Err(err.into())
        }
    }
}

/// Rename a fully-populated staging directory into its final location.
///
/// A concurrent writer may have won the race; in that case the staging
/// directory is discarded and the existing entry is kept. Store entries are
/// value-equal by digest, so either outcome is success.
pub fn commit_dir(staging: &Path, target: &Path) -> Result<(), CommonError> {
    if target.exists() {
        fs::remove_dir_all(staging)?;
        return Ok(());
    }
    match fs::rename(staging, target) {
        Ok(()) => Ok(()),
        Err(_) if target.exists() => {
            fs::remove_dir_all(staging)?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Recursively measure a directory: (total bytes, file count).
pub fn dir_size(path: &Path) -> (u64, u64) {
    let mut bytes = 0;
    let mut files = 0;
    let Ok(entries) = fs::read_dir(path) else {
        return (0, 0);
    };
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            let (b, f) = dir_size(&entry.path());
            bytes += b;
            files += f;
        } else {
            bytes += meta.len();
            files += 1;
        }
    }
    (bytes, files)
}
