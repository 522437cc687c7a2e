//! Per-command execution context.
//!
//! One value threaded explicitly through every command: configuration,
//! resolved platform, on-disk layout, and the flags that used to be global
//! state. Commands never consult mutable globals.

use crate::config::Config;
use anyhow::Result;
use launchpad_install::env_cache::EnvCache;
use launchpad_install::{Layout, Platform};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub layout: Layout,
    pub platform: Platform,
    pub verbose: bool,
    pub dry_run: bool,
    /// Set by the Ctrl-C handler; observed by long-running operations.
    pub cancel: Arc<AtomicBool>,
}

impl Context {
    pub fn new(config: Config, verbose: bool, dry_run: bool) -> Result<Self> {
        let platform = Platform::current()?;
        let layout = Layout::for_user(config.install_path.as_deref());
        let verbose = verbose || config_verbose(&config);
        Ok(Self {
            config,
            layout,
            platform,
            verbose,
            dry_run,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn env_cache(&self) -> EnvCache {
        EnvCache::new(self.layout.clone(), self.platform)
    }

    /// Exclusion set for the resolver: project excludes plus, for global
    /// installs, the global exclude list.
    pub fn exclusions(&self, manifest: &launchpad_install::Manifest) -> Vec<String> {
        let mut exclude: Vec<String> = self
            .config
            .exclude_dependencies
            .iter()
            .chain(manifest.exclude_dependencies.iter())
            .cloned()
            .collect();
        if manifest.global {
            exclude.extend(
                self.config
                    .exclude_global_dependencies
                    .iter()
                    .chain(manifest.exclude_global_dependencies.iter())
                    .cloned(),
            );
        }
        exclude.sort();
        exclude.dedup();
        exclude
    }
}

fn config_verbose(config: &Config) -> bool {
    config.verbose || std::env::var("LAUNCHPAD_DEBUG").as_deref() == Ok("1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_install::Manifest;
    use std::path::Path;

    #[test]
    fn exclusions_merge_config_and_manifest() {
        let mut config = Config::default();
        config.exclude_dependencies.push("php.net".to_string());
        config
            .exclude_global_dependencies
            .push("ruby-lang.org".to_string());
        let ctx = Context::new(config, false, false).unwrap();

        let local = Manifest::parse(
            Path::new("deps.yaml"),
            "dependencies: {}\nexcludeDependencies: [node.org]\n",
        )
        .unwrap();
        let exclusions = ctx.exclusions(&local);
        assert_eq!(exclusions, vec!["node.org", "php.net"]);

        let global = Manifest::parse(Path::new("deps.yaml"), "global: true\n").unwrap();
        let exclusions = ctx.exclusions(&global);
        assert!(exclusions.contains(&"ruby-lang.org".to_string()));
    }
}
