use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("unknown package: {0}")]
    UnknownPackage(String),
    #[error("version conflict for {domain}: constraints {}", constraints.join(", "))]
    VersionConflict {
        domain: String,
        constraints: Vec<String>,
    },
    #[error("bad manifest at {path}: {message}")]
    BadManifest { path: PathBuf, message: String },
    #[error("cyclic service dependency: {}", chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },
    #[error("fetch failed for {package} after {attempts} attempts: {message}")]
    FetchFailed {
        package: String,
        attempts: u32,
        message: String,
    },
    #[error("corrupt artifact for {package}: {message} (run with --force to re-download)")]
    CorruptArtifact { package: String, message: String },
    #[error("failed to link {name}: {message}")]
    LinkFailed { name: String, message: String },
    #[error("no artifact for {domain}@{version} on {platform}")]
    NoSuchArtifact {
        domain: String,
        version: String,
        platform: String,
    },
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Common(#[from] launchpad_common::CommonError),
    #[error("registry error: {0}")]
    Registry(String),
}

impl InstallError {
    /// Process exit code for the CLI boundary: cancelled operations exit 2,
    /// everything else is a recoverable failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            InstallError::Cancelled => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_lists_constraints() {
        let err = InstallError::VersionConflict {
            domain: "openssl.org".to_string(),
            constraints: vec!["^1".to_string(), "^3".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "version conflict for openssl.org: constraints ^1, ^3"
        );
    }

    #[test]
    fn corrupt_artifact_carries_remediation_hint() {
        let err = InstallError::CorruptArtifact {
            package: "bun.sh".to_string(),
            message: "digest mismatch".to_string(),
        };
        assert!(err.to_string().contains("--force"));
    }

    #[test]
    fn cancelled_exits_two() {
        assert_eq!(InstallError::Cancelled.exit_code(), 2);
        assert_eq!(
            InstallError::UnknownPackage("x".to_string()).exit_code(),
            1
        );
    }
}
