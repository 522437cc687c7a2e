//! Manifest fingerprinting.
//!
//! The fingerprint is the cache key and the identity of the resulting
//! environment: a SHA-256 digest over the manifest's semantic content in a
//! normalized byte form. Declaration order, whitespace, and formatting do
//! not affect it; any semantic change does. The manifest's own path is
//! deliberately excluded so identical manifests share one environment.

use crate::manifest::Manifest;
use crate::platform::Platform;
use sha2::{Digest, Sha256};
use std::fmt;

/// Bumped whenever the normalized byte form below changes shape, so stale
/// cache entries from older binaries cannot alias new ones.
const SCHEMA_TAG: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(manifest: &Manifest, platform: Platform) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"launchpad-fingerprint");
        hasher.update(SCHEMA_TAG.to_be_bytes());
        hasher.update(platform.triple().as_bytes());
        hasher.update([manifest.global as u8]);

        // BTreeMap iteration is already sorted by domain.
        for (name, constraint) in &manifest.dependencies {
            hasher.update(b"dep\0");
            hasher.update(name.as_bytes());
            hasher.update(b"\0");
            hasher.update(constraint.canonical().as_bytes());
            hasher.update(b"\0");
        }

        let mut services = manifest.services.clone();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        for service in &services {
            hasher.update(b"svc\0");
            hasher.update(service.name.as_bytes());
            hasher.update(b"\0");
            hasher.update([service.auto_start as u8]);
            if let Some(port) = service.port {
                hasher.update(port.to_be_bytes());
            }
            hasher.update(b"\0");
            for (key, value) in &service.env {
                hasher.update(key.as_bytes());
                hasher.update(b"=");
                hasher.update(value.as_bytes());
                hasher.update(b"\0");
            }
            let mut depends_on = service.depends_on.clone();
            depends_on.sort();
            for dep in &depends_on {
                hasher.update(dep.as_bytes());
                hasher.update(b"\0");
            }
        }

        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading bytes of the fingerprint, used to scope per-project service
    /// unit labels and data paths.
    pub fn project_hash(&self) -> &str {
        &self.0[..8]
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Fingerprint(value)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ServiceDecl;
    use crate::platform::{Arch, Os};
    use std::path::Path;

    const PLATFORM: Platform = Platform {
        os: Os::Linux,
        arch: Arch::X86_64,
    };

    fn manifest(yaml: &str) -> Manifest {
        Manifest::parse(Path::new("deps.yaml"), yaml).unwrap()
    }

    #[test]
    fn declaration_order_and_whitespace_do_not_matter() {
        let a = manifest("dependencies:\n  bun: \"1.3.0\"\n  node: \"^22\"\n");
        let b = manifest("dependencies:\n    node:   \"^22\"\n    bun: \"1.3.0\"\n");
        assert_eq!(
            Fingerprint::compute(&a, PLATFORM),
            Fingerprint::compute(&b, PLATFORM)
        );
    }

    #[test]
    fn version_change_changes_fingerprint() {
        let a = manifest("dependencies:\n  bun: \"1.3.0\"\n");
        let b = manifest("dependencies:\n  bun: \"1.3.1\"\n");
        assert_ne!(
            Fingerprint::compute(&a, PLATFORM),
            Fingerprint::compute(&b, PLATFORM)
        );
    }

    #[test]
    fn service_port_and_global_flag_are_significant() {
        let mut a = Manifest::default();
        a.services.push(ServiceDecl {
            port: Some(6379),
            ..ServiceDecl::bare("redis")
        });
        let mut b = Manifest::default();
        b.services.push(ServiceDecl {
            port: Some(6380),
            ..ServiceDecl::bare("redis")
        });
        assert_ne!(
            Fingerprint::compute(&a, PLATFORM),
            Fingerprint::compute(&b, PLATFORM)
        );

        let mut c = a.clone();
        c.global = true;
        assert_ne!(
            Fingerprint::compute(&a, PLATFORM),
            Fingerprint::compute(&c, PLATFORM)
        );
    }

    #[test]
    fn platform_is_significant() {
        let m = manifest("dependencies:\n  bun: \"1.3.0\"\n");
        let other = Platform {
            os: Os::MacOs,
            arch: Arch::Aarch64,
        };
        assert_ne!(
            Fingerprint::compute(&m, PLATFORM),
            Fingerprint::compute(&m, other)
        );
    }

    #[test]
    fn digest_is_64_hex_chars() {
        let fp = Fingerprint::compute(&Manifest::default(), PLATFORM);
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.project_hash().len(), 8);
    }
}
