//! The two-tier environment cache.
//!
//! Maps a manifest fingerprint to a ready-to-activate environment directory.
//! The hot tier is a small in-process snapshot scanned without holding a
//! lock; the cold tier is one JSON file per fingerprint that survives across
//! invocations. Entries are validated on every read: the env dir must exist,
//! the manifest must still exist with the recorded mtime, and the entry must
//! be younger than its TTL. Anything else is a miss, never an error.

use crate::error::InstallError;
use crate::fingerprint::Fingerprint;
use crate::manifest::{self, Manifest};
use crate::paths::Layout;
use crate::platform::Platform;
use launchpad_common::fsx;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const HOT_CAPACITY: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub env_dir: PathBuf,
    pub manifest_path: PathBuf,
    /// Manifest mtime at capture, seconds since the epoch.
    pub manifest_mtime: u64,
    pub created_at: u64,
    pub last_used_at: u64,
    pub ttl_secs: u64,
}

pub struct EnvCache {
    layout: Layout,
    platform: Platform,
    ttl: Duration,
    /// Readers clone the Arc under a momentary read lock and scan the
    /// snapshot unlocked; writers swap in a rebuilt snapshot.
    hot: RwLock<Arc<Vec<CacheEntry>>>,
}

impl EnvCache {
    pub fn new(layout: Layout, platform: Platform) -> Self {
        Self {
            layout,
            platform,
            ttl: DEFAULT_TTL,
            hot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Resolve `start_dir` to a cached, still-valid environment.
    ///
    /// Walks upward for the first manifest file, fingerprints it, and probes
    /// hot then cold. Returns `(env_dir, project_dir)` on a hit. Read-only:
    /// a miss never triggers installation and never mutates either tier.
    pub fn lookup(&self, start_dir: &Path) -> Option<(PathBuf, PathBuf)> {
        let (manifest_path, project_dir) = manifest::discover(start_dir)?;
        let parsed = Manifest::load(&manifest_path).ok()?;
        let fingerprint = Fingerprint::compute(&parsed, self.platform);

        if let Some(entry) = self.probe_hot(fingerprint.as_str()) {
            if self.is_valid(&entry) {
                return Some((entry.env_dir, project_dir));
            }
            debug!(fingerprint = %fingerprint, "hot cache entry stale");
        }

        let entry = self.read_cold(fingerprint.as_str())?;
        if self.is_valid(&entry) {
            return Some((entry.env_dir, project_dir));
        }
        debug!(fingerprint = %fingerprint, "cold cache entry stale");
        None
    }

    /// Insert or refresh the entry for a fingerprint in both tiers.
    pub fn remember(
        &self,
        fingerprint: &Fingerprint,
        env_dir: &Path,
        manifest_path: &Path,
    ) -> Result<(), InstallError> {
        let manifest_mtime = file_mtime(manifest_path)?;
        let now = unix_now();
        let entry = CacheEntry {
            fingerprint: fingerprint.as_str().to_string(),
            env_dir: env_dir.to_path_buf(),
            manifest_path: manifest_path.to_path_buf(),
            manifest_mtime,
            created_at: now,
            last_used_at: now,
            ttl_secs: self.ttl.as_secs(),
        };

        self.write_cold(&entry)?;
        self.insert_hot(entry);
        Ok(())
    }

    pub fn invalidate(&self, fingerprint: &str) {
        {
            let mut hot = self.hot.write().expect("hot tier lock poisoned");
            let next: Vec<CacheEntry> = hot
                .iter()
                .filter(|entry| entry.fingerprint != fingerprint)
                .cloned()
                .collect();
            *hot = Arc::new(next);
        }
        let _ = fs::remove_file(self.layout.cold_cache_entry(fingerprint));
    }

    /// Drop the whole cold tier and the hot snapshot.
    pub fn clear_all(&self) -> Result<(), InstallError> {
        {
            let mut hot = self.hot.write().expect("hot tier lock poisoned");
            *hot = Arc::new(Vec::new());
        }
        let dir = self.layout.cold_cache_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Remove cold entries whose `last_used_at` is older than `older_than`,
    /// returning them so callers can also reap the env directories.
    pub fn gc(&self, older_than: Duration) -> Result<Vec<CacheEntry>, InstallError> {
        let cutoff = unix_now().saturating_sub(older_than.as_secs());
        let mut removed = Vec::new();
        for entry in self.cold_entries()? {
            if entry.last_used_at < cutoff {
                self.invalidate(&entry.fingerprint);
                removed.push(entry);
            }
        }
        Ok(removed)
    }

    /// All parseable cold-tier entries.
    pub fn cold_entries(&self) -> Result<Vec<CacheEntry>, InstallError> {
        let dir = self.layout.cold_cache_dir();
        let mut entries = Vec::new();
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(err.into()),
        };
        for dirent in read_dir {
            let path = dirent?.path();
            if let Some(entry) = read_entry_file(&path) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(entries)
    }

    fn is_valid(&self, entry: &CacheEntry) -> bool {
        if !entry.env_dir.is_dir() {
            return false;
        }
        let Ok(mtime) = file_mtime(&entry.manifest_path) else {
            return false;
        };
        if mtime != entry.manifest_mtime {
            return false;
        }
        unix_now().saturating_sub(entry.created_at) < entry.ttl_secs
    }

    fn probe_hot(&self, fingerprint: &str) -> Option<CacheEntry> {
        let snapshot = {
            let hot = self.hot.read().expect("hot tier lock poisoned");
            Arc::clone(&hot)
        };
        snapshot
            .iter()
            .find(|entry| entry.fingerprint == fingerprint)
            .cloned()
    }

    fn insert_hot(&self, entry: CacheEntry) {
        let mut hot = self.hot.write().expect("hot tier lock poisoned");
        let mut next: Vec<CacheEntry> = hot
            .iter()
            .filter(|existing| existing.fingerprint != entry.fingerprint)
            .cloned()
            .collect();
        next.push(entry);
        // FIFO eviction: oldest insertion leaves first.
        while next.len() > HOT_CAPACITY {
            next.remove(0);
        }
        *hot = Arc::new(next);
    }

    fn read_cold(&self, fingerprint: &str) -> Option<CacheEntry> {
        read_entry_file(&self.layout.cold_cache_entry(fingerprint))
    }

    fn write_cold(&self, entry: &CacheEntry) -> Result<(), InstallError> {
        let path = self.layout.cold_cache_entry(&entry.fingerprint);
        let json = serde_json::to_vec_pretty(entry).map_err(launchpad_common::CommonError::from)?;
        fsx::write_atomic(&path, &json)?;
        Ok(())
    }
}

/// Partial or unparseable files read as absent.
fn read_entry_file(path: &Path) -> Option<CacheEntry> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn file_mtime(path: &Path) -> Result<u64, InstallError> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};
    use tempfile::TempDir;

    const PLATFORM: Platform = Platform {
        os: Os::Linux,
        arch: Arch::X86_64,
    };

    struct Fixture {
        _temp: TempDir,
        cache: EnvCache,
        project: PathBuf,
        manifest_path: PathBuf,
        env_dir: PathBuf,
        fingerprint: Fingerprint,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path().join("data"), temp.path().join("cache"));

        let project = temp.path().join("project");
        fs::create_dir_all(&project).unwrap();
        let manifest_path = project.join("deps.yaml");
        fs::write(&manifest_path, "dependencies:\n  bun: \"1.3.0\"\n").unwrap();

        let parsed = Manifest::load(&manifest_path).unwrap();
        let fingerprint = Fingerprint::compute(&parsed, PLATFORM);

        let env_dir = layout.env_dir(fingerprint.as_str());
        fs::create_dir_all(env_dir.join("bin")).unwrap();

        let cache = EnvCache::new(layout, PLATFORM);
        Fixture {
            _temp: temp,
            cache,
            project,
            manifest_path,
            env_dir,
            fingerprint,
        }
    }

    #[test]
    fn remember_then_lookup_hits() {
        let fx = fixture();
        fx.cache
            .remember(&fx.fingerprint, &fx.env_dir, &fx.manifest_path)
            .unwrap();

        let (env_dir, project_dir) = fx.cache.lookup(&fx.project).unwrap();
        assert_eq!(env_dir, fx.env_dir);
        assert_eq!(project_dir, fx.project);
    }

    #[test]
    fn lookup_walks_up_from_subdirectory() {
        let fx = fixture();
        fx.cache
            .remember(&fx.fingerprint, &fx.env_dir, &fx.manifest_path)
            .unwrap();

        let nested = fx.project.join("src/deep");
        fs::create_dir_all(&nested).unwrap();
        let (_, project_dir) = fx.cache.lookup(&nested).unwrap();
        assert_eq!(project_dir, fx.project);
    }

    #[test]
    fn cold_tier_survives_process_restart() {
        let fx = fixture();
        fx.cache
            .remember(&fx.fingerprint, &fx.env_dir, &fx.manifest_path)
            .unwrap();

        // A fresh cache (empty hot tier) over the same layout still hits.
        let fresh = EnvCache::new(fx.cache.layout.clone(), PLATFORM);
        assert!(fresh.lookup(&fx.project).is_some());
    }

    #[test]
    fn manifest_touch_invalidates() {
        let fx = fixture();
        fx.cache
            .remember(&fx.fingerprint, &fx.env_dir, &fx.manifest_path)
            .unwrap();

        // Rewriting with different content changes the fingerprint; rewriting
        // the same bytes with a bumped mtime must also miss.
        let entry = fx.cache.read_cold(fx.fingerprint.as_str()).unwrap();
        let mut stale = entry.clone();
        stale.manifest_mtime = entry.manifest_mtime - 10;
        fx.cache.write_cold(&stale).unwrap();
        fx.cache.insert_hot(stale);

        assert!(fx.cache.lookup(&fx.project).is_none());
    }

    #[test]
    fn missing_env_dir_invalidates() {
        let fx = fixture();
        fx.cache
            .remember(&fx.fingerprint, &fx.env_dir, &fx.manifest_path)
            .unwrap();
        fs::remove_dir_all(&fx.env_dir).unwrap();

        assert!(fx.cache.lookup(&fx.project).is_none());
    }

    #[test]
    fn expired_ttl_invalidates() {
        let fx = fixture();
        let cache = EnvCache::new(fx.cache.layout.clone(), PLATFORM)
            .with_ttl(Duration::from_secs(0));
        cache
            .remember(&fx.fingerprint, &fx.env_dir, &fx.manifest_path)
            .unwrap();

        assert!(cache.lookup(&fx.project).is_none());
    }

    #[test]
    fn partial_cold_file_reads_as_absent() {
        let fx = fixture();
        let path = fx.cache.layout.cold_cache_entry(fx.fingerprint.as_str());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{\"fingerprint\": \"trunc").unwrap();

        assert!(fx.cache.lookup(&fx.project).is_none());
    }

    #[test]
    fn hot_tier_evicts_fifo_beyond_capacity() {
        let fx = fixture();
        for index in 0..=HOT_CAPACITY {
            fx.cache.insert_hot(CacheEntry {
                fingerprint: format!("fp-{index}"),
                env_dir: fx.env_dir.clone(),
                manifest_path: fx.manifest_path.clone(),
                manifest_mtime: 0,
                created_at: 0,
                last_used_at: 0,
                ttl_secs: 3600,
            });
        }
        assert!(fx.cache.probe_hot("fp-0").is_none());
        assert!(fx.cache.probe_hot(&format!("fp-{HOT_CAPACITY}")).is_some());
    }

    #[test]
    fn gc_removes_old_entries_and_reports_them() {
        let fx = fixture();
        fx.cache
            .remember(&fx.fingerprint, &fx.env_dir, &fx.manifest_path)
            .unwrap();

        // Nothing is old enough yet.
        assert!(fx.cache.gc(Duration::from_secs(60)).unwrap().is_empty());

        let removed = fx.cache.gc(Duration::from_secs(0)).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].fingerprint, fx.fingerprint.as_str());
        assert!(fx.cache.lookup(&fx.project).is_none());
    }

    #[test]
    fn clear_all_drops_cold_dir() {
        let fx = fixture();
        fx.cache
            .remember(&fx.fingerprint, &fx.env_dir, &fx.manifest_path)
            .unwrap();
        fx.cache.clear_all().unwrap();
        assert!(!fx.cache.layout.cold_cache_dir().exists());
        assert!(fx.cache.lookup(&fx.project).is_none());
    }
}
