use crate::error::CommonError;
use flate2::read::GzDecoder;
use lzma_rs::xz_decompress;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tar::Archive;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    TarGz,
    TarXz,
    Zip,
    Raw,
}

pub fn detect_archive_type(name: &str) -> ArchiveType {
    let lower = name.to_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        ArchiveType::TarGz
    } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
        ArchiveType::TarXz
    } else if lower.ends_with(".zip") {
        ArchiveType::Zip
    } else {
        ArchiveType::Raw
    }
}

/// Extract a package artifact into `target_dir`, dispatching on the archive
/// type detected from `name`. Raw artifacts are written as a single file
/// named after the last URL path segment.
pub fn extract_artifact(
    name: &str,
    data: &[u8],
    target_dir: &Path,
    strip_components: u32,
) -> Result<(), CommonError> {
    match detect_archive_type(name) {
        ArchiveType::TarGz => extract_tar_gz(data, target_dir, strip_components),
        ArchiveType::TarXz => extract_tar_xz(data, target_dir, strip_components),
        ArchiveType::Zip => extract_zip(data, target_dir),
        ArchiveType::Raw => {
            fs::create_dir_all(target_dir)?;
            let file_name = name.rsplit('/').next().unwrap_or(name);
            fs::write(target_dir.join(file_name), data)?;
            Ok(())
        }
    }
}

pub fn extract_tar_gz(
    data: &[u8],
    target_dir: &Path,
    strip_components: u32,
) -> Result<(), CommonError> {
    fs::create_dir_all(target_dir)?;
    let cursor = Cursor::new(data);
    let decoder = GzDecoder::new(cursor);
    let mut archive = Archive::new(decoder);
    extract_tar_entries(&mut archive, target_dir, strip_components)
}

pub fn extract_tar_xz(
    data: &[u8],
    target_dir: &Path,
    strip_components: u32,
) -> Result<(), CommonError> {
    fs::create_dir_all(target_dir)?;
    let mut decompressed = Vec::new();
    xz_decompress(&mut Cursor::new(data), &mut decompressed)
        .map_err(|err| CommonError::Archive(err.to_string()))?;
    let mut archive = Archive::new(Cursor::new(&decompressed));
    extract_tar_entries(&mut archive, target_dir, strip_components)
}

pub fn extract_zip(data: &[u8], target_dir: &Path) -> Result<(), CommonError> {
    fs::create_dir_all(target_dir)?;
    let cursor = Cursor::new(data);
    let mut archive =
        ZipArchive::new(cursor).map_err(|err| CommonError::Archive(err.to_string()))?;

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|err| CommonError::Archive(err.to_string()))?;
        let Some(enclosed) = file.enclosed_name() else {
            continue;
        };
        let out_path = target_dir.join(enclosed);

        if file.name().ends_with('/') {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = fs::File::create(&out_path)?;
        std::io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(())
}

pub fn set_executable(path: &Path) -> Result<(), CommonError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}

fn extract_tar_entries<R: std::io::Read>(
    archive: &mut Archive<R>,
    target_dir: &Path,
    strip_components: u32,
) -> Result<(), CommonError> {
    let strip = strip_components as usize;

    for entry in archive
        .entries()
        .map_err(|err| CommonError::Archive(err.to_string()))?
    {
        let mut entry = entry.map_err(|err| CommonError::Archive(err.to_string()))?;
        let entry_path = entry
            .path()
            .map_err(|err| CommonError::Archive(err.to_string()))?
            .to_path_buf();
        let Some(stripped) = strip_path(&entry_path, strip) else {
            continue;
        };
        let out_path = target_dir.join(stripped);

        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        entry
            .unpack(&out_path)
            .map_err(|err| CommonError::Archive(err.to_string()))?;
    }

    Ok(())
}

fn strip_path(path: &Path, strip_components: usize) -> Option<PathBuf> {
    if strip_components == 0 {
        return Some(path.to_path_buf());
    }

    let stripped: PathBuf = path.components().skip(strip_components).collect();
    if stripped.as_os_str().is_empty() {
        None
    } else {
        Some(stripped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn detects_archive_types() {
        assert_eq!(detect_archive_type("pkg-1.0.tar.gz"), ArchiveType::TarGz);
        assert_eq!(detect_archive_type("pkg-1.0.TGZ"), ArchiveType::TarGz);
        assert_eq!(detect_archive_type("pkg-1.0.tar.xz"), ArchiveType::TarXz);
        assert_eq!(detect_archive_type("pkg-1.0.zip"), ArchiveType::Zip);
        assert_eq!(detect_archive_type("pkg"), ArchiveType::Raw);
    }

    #[test]
    fn extracts_tar_gz_tree() {
        let data = make_tar_gz(&[("bin/tool", "#!/bin/sh\n"), ("lib/libx.so", "elf")]);
        let temp = TempDir::new().unwrap();

        extract_tar_gz(&data, temp.path(), 0).unwrap();

        assert!(temp.path().join("bin/tool").is_file());
        assert!(temp.path().join("lib/libx.so").is_file());
    }

    #[test]
    fn strips_leading_components() {
        let data = make_tar_gz(&[("pkg-1.0/bin/tool", "x")]);
        let temp = TempDir::new().unwrap();

        extract_tar_gz(&data, temp.path(), 1).unwrap();

        assert!(temp.path().join("bin/tool").is_file());
        assert!(!temp.path().join("pkg-1.0").exists());
    }

    #[test]
    fn raw_artifact_written_under_url_basename() {
        let temp = TempDir::new().unwrap();
        extract_artifact("https://host/dl/tool", b"binary", temp.path(), 0).unwrap();
        assert_eq!(fs::read(temp.path().join("tool")).unwrap(), b"binary");
    }

    #[test]
    fn strip_path_drops_exhausted_entries() {
        assert_eq!(strip_path(Path::new("a/b"), 1), Some(PathBuf::from("b")));
        assert_eq!(strip_path(Path::new("a"), 1), None);
        assert_eq!(strip_path(Path::new("a/b"), 0), Some(PathBuf::from("a/b")));
    }
}
