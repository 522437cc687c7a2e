//! The package registry capability.
//!
//! The core holds no registry-protocol knowledge of its own: the resolver and
//! install engine are written against the [`PackageRegistry`] trait. The
//! shipped [`HttpRegistry`] speaks a small JSON protocol over HTTPS;
//! [`StaticRegistry`] is an in-memory implementation used throughout the test
//! suite.

use crate::error::InstallError;
use crate::manifest::Constraint;
use crate::platform::Platform;
use async_trait::async_trait;
use semver::Version;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

/// Runtime/build-time classification of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepKind {
    Runtime,
    Buildtime,
}

/// One registry-declared dependency descriptor: `[kind:]domain[range]`.
///
/// `build:gnu.org/make^4` declares a build-time edge; an unprefixed
/// descriptor is a runtime edge. A descriptor without a range means any
/// version.
#[derive(Debug, Clone, PartialEq)]
pub struct DepSpec {
    pub kind: DepKind,
    pub domain: String,
    pub constraint: Constraint,
}

impl FromStr for DepSpec {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (kind, rest) = match trimmed.split_once(':') {
            Some(("build", rest)) => (DepKind::Buildtime, rest),
            Some((other, _)) => return Err(format!("unknown dependency kind '{other}'")),
            None => (DepKind::Runtime, trimmed),
        };

        let split_at = rest
            .find(|c: char| matches!(c, '^' | '~' | '=' | '<' | '>' | '*' | '@'))
            .unwrap_or(rest.len());
        let (domain, range) = rest.split_at(split_at);
        let range = range.trim_start_matches('@');

        if domain.is_empty() {
            return Err(format!("empty domain in dependency '{trimmed}'"));
        }

        let constraint = if range.is_empty() {
            Constraint::Req(semver::VersionReq::STAR)
        } else {
            Constraint::from_str(range)?
        };

        Ok(Self {
            kind,
            domain: domain.to_string(),
            constraint,
        })
    }
}

/// Registry metadata for one package.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub domain: String,
    pub description: String,
    pub latest_version: Version,
    pub total_versions: usize,
    /// Binary basenames this package exposes on `PATH`.
    pub programs: Vec<String>,
    pub dependencies: Vec<DepSpec>,
}

/// Where an artifact lives and what it must digest to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub url: String,
    pub digest: String,
}

#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Metadata for a package by canonical domain or alias.
    async fn get_package_info(&self, name: &str) -> Result<PackageInfo, InstallError>;

    /// Published versions in descending semver order.
    async fn enumerate_versions(&self, domain: &str) -> Result<Vec<Version>, InstallError>;

    /// Locate the artifact for an exact `(domain, version, platform)`.
    async fn artifact_ref(
        &self,
        domain: &str,
        version: &Version,
        platform: Platform,
    ) -> Result<ArtifactRef, InstallError>;

    /// Download an artifact's bytes. The caller verifies the digest.
    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, InstallError>;

    /// Alias table: short name -> canonical domain.
    async fn aliases(&self) -> Result<BTreeMap<String, String>, InstallError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WirePackageInfo {
    domain: String,
    #[serde(default)]
    description: String,
    latest_version: String,
    #[serde(default)]
    total_versions: usize,
    #[serde(default)]
    programs: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireArtifact {
    url: String,
    sha256: String,
}

pub struct HttpRegistry {
    base_url: String,
    client: reqwest::Client,
    offline: bool,
}

impl HttpRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("launchpad/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            offline: std::env::var("LAUNCHPAD_SKIP_NETWORK").as_deref() == Ok("1"),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, InstallError> {
        if self.offline {
            return Err(InstallError::Registry(
                "network disabled by LAUNCHPAD_SKIP_NETWORK".to_string(),
            ));
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| InstallError::Registry(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(InstallError::Registry(format!(
                "HTTP {} for {url}",
                response.status()
            )));
        }
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|err| InstallError::Registry(err.to_string()))
    }
}

#[async_trait]
impl PackageRegistry for HttpRegistry {
    async fn get_package_info(&self, name: &str) -> Result<PackageInfo, InstallError> {
        let url = format!("{}/packages/{name}", self.base_url);
        let wire: WirePackageInfo = self
            .get_json(&url)
            .await?
            .ok_or_else(|| InstallError::UnknownPackage(name.to_string()))?;

        let latest_version = Version::parse(&wire.latest_version)
            .map_err(|err| InstallError::Registry(format!("bad latest_version: {err}")))?;
        let dependencies = wire
            .dependencies
            .iter()
            .map(|spec| DepSpec::from_str(spec))
            .collect::<Result<Vec<_>, _>>()
            .map_err(InstallError::Registry)?;

        Ok(PackageInfo {
            domain: wire.domain,
            description: wire.description,
            latest_version,
            total_versions: wire.total_versions,
            programs: wire.programs,
            dependencies,
        })
    }

    async fn enumerate_versions(&self, domain: &str) -> Result<Vec<Version>, InstallError> {
        let url = format!("{}/packages/{domain}/versions", self.base_url);
        let raw: Vec<String> = self
            .get_json(&url)
            .await?
            .ok_or_else(|| InstallError::UnknownPackage(domain.to_string()))?;

        let mut versions = raw
            .iter()
            .map(|v| Version::parse(v))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| InstallError::Registry(format!("bad version list: {err}")))?;
        versions.sort();
        versions.reverse();
        Ok(versions)
    }

    async fn artifact_ref(
        &self,
        domain: &str,
        version: &Version,
        platform: Platform,
    ) -> Result<ArtifactRef, InstallError> {
        let url = format!(
            "{}/packages/{domain}/v{version}/{}/{}",
            self.base_url,
            platform.os.as_str(),
            platform.arch.as_str()
        );
        let wire: WireArtifact =
            self.get_json(&url)
                .await?
                .ok_or_else(|| InstallError::NoSuchArtifact {
                    domain: domain.to_string(),
                    version: version.to_string(),
                    platform: platform.triple(),
                })?;

        Ok(ArtifactRef {
            url: wire.url,
            digest: wire.sha256,
        })
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, InstallError> {
        if self.offline {
            return Err(InstallError::Registry(
                "network disabled by LAUNCHPAD_SKIP_NETWORK".to_string(),
            ));
        }
        let response = self
            .client
            .get(&artifact.url)
            .send()
            .await
            .map_err(|err| InstallError::Registry(err.to_string()))?;

        if !response.status().is_success() {
            return Err(InstallError::Registry(format!(
                "HTTP {} for {}",
                response.status(),
                artifact.url
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| InstallError::Registry(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn aliases(&self) -> Result<BTreeMap<String, String>, InstallError> {
        let url = format!("{}/aliases", self.base_url);
        Ok(self.get_json(&url).await?.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation for tests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct StaticPackage {
    pub description: String,
    /// Descending order, like the wire contract.
    pub versions: Vec<Version>,
    pub programs: Vec<String>,
    pub dependencies: Vec<String>,
}

/// A registry backed by in-process tables. Artifacts registered with
/// [`StaticRegistry::add_artifact`] are served from memory, which lets engine
/// tests run a complete install without touching the network.
#[derive(Default)]
pub struct StaticRegistry {
    packages: BTreeMap<String, StaticPackage>,
    aliases: BTreeMap<String, String>,
    artifacts: HashMap<String, (String, Vec<u8>)>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_package(&mut self, domain: &str, package: StaticPackage) -> &mut Self {
        self.packages.insert(domain.to_string(), package);
        self
    }

    pub fn add_alias(&mut self, alias: &str, domain: &str) -> &mut Self {
        self.aliases.insert(alias.to_string(), domain.to_string());
        self
    }

    /// Register artifact bytes for `(domain, version)` on every platform.
    /// The digest is computed from the bytes.
    pub fn add_artifact(&mut self, domain: &str, version: &str, bytes: Vec<u8>) -> &mut Self {
        let digest = launchpad_common::checksum::sha256_hex(&bytes);
        self.artifacts
            .insert(Self::artifact_url(domain, version), (digest, bytes));
        self
    }

    /// Register an artifact whose advertised digest deliberately disagrees
    /// with its bytes.
    pub fn add_corrupt_artifact(
        &mut self,
        domain: &str,
        version: &str,
        bytes: Vec<u8>,
        advertised_digest: &str,
    ) -> &mut Self {
        self.artifacts.insert(
            Self::artifact_url(domain, version),
            (advertised_digest.to_string(), bytes),
        );
        self
    }

    fn artifact_url(domain: &str, version: &str) -> String {
        format!("static://{domain}/v{version}")
    }
}

#[async_trait]
impl PackageRegistry for StaticRegistry {
    async fn get_package_info(&self, name: &str) -> Result<PackageInfo, InstallError> {
        let domain = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        let package = self
            .packages
            .get(domain)
            .ok_or_else(|| InstallError::UnknownPackage(name.to_string()))?;
        let latest_version = package
            .versions
            .first()
            .cloned()
            .ok_or_else(|| InstallError::UnknownPackage(name.to_string()))?;
        let dependencies = package
            .dependencies
            .iter()
            .map(|spec| DepSpec::from_str(spec))
            .collect::<Result<Vec<_>, _>>()
            .map_err(InstallError::Registry)?;

        Ok(PackageInfo {
            domain: domain.to_string(),
            description: package.description.clone(),
            latest_version,
            total_versions: package.versions.len(),
            programs: package.programs.clone(),
            dependencies,
        })
    }

    async fn enumerate_versions(&self, domain: &str) -> Result<Vec<Version>, InstallError> {
        self.packages
            .get(domain)
            .map(|package| package.versions.clone())
            .ok_or_else(|| InstallError::UnknownPackage(domain.to_string()))
    }

    async fn artifact_ref(
        &self,
        domain: &str,
        version: &Version,
        platform: Platform,
    ) -> Result<ArtifactRef, InstallError> {
        let url = Self::artifact_url(domain, &version.to_string());
        match self.artifacts.get(&url) {
            Some((digest, _)) => Ok(ArtifactRef {
                url,
                digest: digest.clone(),
            }),
            None => Err(InstallError::NoSuchArtifact {
                domain: domain.to_string(),
                version: version.to_string(),
                platform: platform.triple(),
            }),
        }
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, InstallError> {
        self.artifacts
            .get(&artifact.url)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| InstallError::Registry(format!("no such artifact: {}", artifact.url)))
    }

    async fn aliases(&self) -> Result<BTreeMap<String, String>, InstallError> {
        Ok(self.aliases.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};

    const PLATFORM: Platform = Platform {
        os: Os::Linux,
        arch: Arch::X86_64,
    };

    #[test]
    fn dep_spec_parsing() {
        let spec = DepSpec::from_str("openssl.org^1.1").unwrap();
        assert_eq!(spec.kind, DepKind::Runtime);
        assert_eq!(spec.domain, "openssl.org");
        assert_eq!(spec.constraint.canonical(), "^1.1");

        let build = DepSpec::from_str("build:gnu.org/make^4").unwrap();
        assert_eq!(build.kind, DepKind::Buildtime);
        assert_eq!(build.domain, "gnu.org/make");

        let bare = DepSpec::from_str("zlib.net").unwrap();
        assert_eq!(bare.constraint.canonical(), "*");

        assert!(DepSpec::from_str("weird:x.org").is_err());
        assert!(DepSpec::from_str("^1.2").is_err());
    }

    #[tokio::test]
    async fn static_registry_resolves_aliases() {
        let mut registry = StaticRegistry::new();
        registry
            .add_package(
                "bun.sh",
                StaticPackage {
                    versions: vec![Version::new(1, 3, 0)],
                    programs: vec!["bun".to_string()],
                    ..Default::default()
                },
            )
            .add_alias("bun", "bun.sh");

        let info = registry.get_package_info("bun").await.unwrap();
        assert_eq!(info.domain, "bun.sh");
        assert_eq!(info.latest_version, Version::new(1, 3, 0));

        let err = registry.get_package_info("nope").await.unwrap_err();
        assert!(matches!(err, InstallError::UnknownPackage(_)));
    }

    #[tokio::test]
    async fn static_registry_serves_artifacts() {
        let mut registry = StaticRegistry::new();
        registry.add_package(
            "bun.sh",
            StaticPackage {
                versions: vec![Version::new(1, 3, 0)],
                ..Default::default()
            },
        );
        registry.add_artifact("bun.sh", "1.3.0", b"artifact-bytes".to_vec());

        let artifact = registry
            .artifact_ref("bun.sh", &Version::new(1, 3, 0), PLATFORM)
            .await
            .unwrap();
        let bytes = registry.fetch_artifact(&artifact).await.unwrap();
        launchpad_common::checksum::verify_sha256(&bytes, &artifact.digest).unwrap();

        let missing = registry
            .artifact_ref("bun.sh", &Version::new(9, 9, 9), PLATFORM)
            .await
            .unwrap_err();
        assert!(matches!(missing, InstallError::NoSuchArtifact { .. }));
    }

    #[tokio::test]
    async fn http_registry_package_info() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/packages/bun.sh")
            .with_status(200)
            .with_body(
                r#"{
                    "domain": "bun.sh",
                    "description": "JS runtime",
                    "latest_version": "1.3.0",
                    "total_versions": 42,
                    "programs": ["bun", "bunx"],
                    "dependencies": ["build:gnu.org/make^4", "zlib.net^1.2"]
                }"#,
            )
            .create_async()
            .await;

        let registry = HttpRegistry::new(server.url());
        let info = registry.get_package_info("bun.sh").await.unwrap();
        assert_eq!(info.programs, vec!["bun", "bunx"]);
        assert_eq!(info.dependencies.len(), 2);
        assert_eq!(info.dependencies[0].kind, DepKind::Buildtime);
    }

    #[tokio::test]
    async fn http_registry_404_is_unknown_package() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/packages/ghost")
            .with_status(404)
            .create_async()
            .await;

        let registry = HttpRegistry::new(server.url());
        let err = registry.get_package_info("ghost").await.unwrap_err();
        assert!(matches!(err, InstallError::UnknownPackage(_)));
    }

    #[tokio::test]
    async fn http_registry_sorts_versions_descending() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/packages/zlib.net/versions")
            .with_status(200)
            .with_body(r#"["1.2.11", "1.3.1", "1.2.13"]"#)
            .create_async()
            .await;

        let registry = HttpRegistry::new(server.url());
        let versions = registry.enumerate_versions("zlib.net").await.unwrap();
        assert_eq!(
            versions,
            vec![
                Version::new(1, 3, 1),
                Version::new(1, 2, 13),
                Version::new(1, 2, 11)
            ]
        );
    }
}
