//! Canonical on-disk layout.
//!
//! Everything launchpad persists lives under a single prefix, by default
//! `$HOME/.local/share/launchpad`, with the cold cache tier separated under
//! `~/.cache/launchpad` so `cache clear` can drop it wholesale.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Layout {
    prefix: PathBuf,
    cache_root: PathBuf,
}

impl Layout {
    pub fn new(prefix: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            cache_root: cache_root.into(),
        }
    }

    /// Default layout for the current user, honoring an explicit
    /// `installPath` override from configuration.
    pub fn for_user(install_path: Option<&Path>) -> Self {
        let prefix = install_path.map(Path::to_path_buf).unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("launchpad")
        });
        let cache_root = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("launchpad");
        Self { prefix, cache_root }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Package store root: `{prefix}/pkgs`.
    pub fn pkgs_dir(&self) -> PathBuf {
        self.prefix.join("pkgs")
    }

    /// Per-environment directories: `{prefix}/envs/{fingerprint}`.
    pub fn envs_dir(&self) -> PathBuf {
        self.prefix.join("envs")
    }

    pub fn env_dir(&self, fingerprint: &str) -> PathBuf {
        self.envs_dir().join(fingerprint)
    }

    /// User-global environment for manifests with `global: true`.
    pub fn global_env_dir(&self) -> PathBuf {
        self.prefix.join("global")
    }

    /// Service data directories: `{prefix}/services/{service}`.
    pub fn service_data_dir(&self, service: &str) -> PathBuf {
        self.prefix.join("services").join(service)
    }

    /// Service logs: `{prefix}/logs/{service}.log`.
    pub fn service_log_file(&self, service: &str) -> PathBuf {
        self.prefix.join("logs").join(format!("{service}.log"))
    }

    /// Cold-tier cache entries: `~/.cache/launchpad/envs/{fingerprint}`.
    pub fn cold_cache_dir(&self) -> PathBuf {
        self.cache_root.join("envs")
    }

    pub fn cold_cache_entry(&self, fingerprint: &str) -> PathBuf {
        self.cold_cache_dir().join(fingerprint)
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_places_components_under_prefix() {
        let layout = Layout::new("/data/launchpad", "/cache/launchpad");
        assert_eq!(layout.pkgs_dir(), PathBuf::from("/data/launchpad/pkgs"));
        assert_eq!(
            layout.env_dir("abc123"),
            PathBuf::from("/data/launchpad/envs/abc123")
        );
        assert_eq!(
            layout.service_log_file("postgres"),
            PathBuf::from("/data/launchpad/logs/postgres.log")
        );
        assert_eq!(
            layout.cold_cache_entry("abc123"),
            PathBuf::from("/cache/launchpad/envs/abc123")
        );
    }

    #[test]
    fn install_path_override_wins() {
        let layout = Layout::for_user(Some(Path::new("/opt/lp")));
        assert_eq!(layout.prefix(), Path::new("/opt/lp"));
    }
}
