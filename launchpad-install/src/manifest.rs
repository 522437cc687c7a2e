//! Project dependency manifests.
//!
//! The same logical manifest is accepted as YAML (`deps.yaml`, `deps.yml`,
//! `dependencies.yaml`, `dependencies.yml`) or JSON (`package.json`,
//! `pantry.json`). Discovery walks upward from the starting directory and
//! checks the filenames in that order; the first match wins.

use crate::error::InstallError;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const MANIFEST_FILENAMES: &[&str] = &[
    "deps.yaml",
    "deps.yml",
    "dependencies.yaml",
    "dependencies.yml",
    "package.json",
    "pantry.json",
];

/// A version constraint as declared in a manifest.
///
/// Bare versions parse with caret semantics (`1.2` means `^1.2`), matching
/// how registries interpret them. `latest` is a sentinel resolved against the
/// newest published version at install time.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Latest,
    Req(VersionReq),
}

impl Constraint {
    /// Canonical form used for fingerprinting: `latest`, or the normalized
    /// requirement string (`^1.2`, `~1.2.3`, `=1.3.0`, `*`).
    pub fn canonical(&self) -> String {
        match self {
            Constraint::Latest => "latest".to_string(),
            Constraint::Req(req) => req.to_string(),
        }
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Constraint::Latest => true,
            Constraint::Req(req) => req.matches(version),
        }
    }
}

impl FromStr for Constraint {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Constraint::Req(VersionReq::STAR));
        }
        if trimmed.eq_ignore_ascii_case("latest") {
            return Ok(Constraint::Latest);
        }
        VersionReq::parse(trimmed)
            .map(Constraint::Req)
            .map_err(|err| format!("invalid constraint '{trimmed}': {err}"))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// One declared service, normalized from either the bare-name or the record
/// form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDecl {
    pub name: String,
    #[serde(default = "default_true", rename = "autoStart")]
    pub auto_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, rename = "dependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl ServiceDecl {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_start: true,
            port: None,
            env: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawServiceItem {
    Name(String),
    Record(ServiceDecl),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawServices {
    List(Vec<RawServiceItem>),
    Map(BTreeMap<String, RawServiceOverrides>),
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawServiceOverrides {
    #[serde(default = "default_true", rename = "autoStart")]
    auto_start: bool,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default, rename = "dependsOn")]
    depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    services: Option<RawServices>,
    #[serde(default)]
    global: bool,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
    #[serde(default, rename = "excludeDependencies")]
    exclude_dependencies: Vec<String>,
    #[serde(default, rename = "excludeGlobalDependencies")]
    exclude_global_dependencies: Vec<String>,
}

/// A parsed and validated project manifest.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Declared dependencies: package alias or domain -> constraint.
    pub dependencies: BTreeMap<String, Constraint>,
    /// Declared services in declaration order.
    pub services: Vec<ServiceDecl>,
    /// Install into the user-global env instead of a per-project one.
    pub global: bool,
    /// Pass-through script strings (not interpreted by the core).
    pub scripts: BTreeMap<String, String>,
    pub exclude_dependencies: Vec<String>,
    pub exclude_global_dependencies: Vec<String>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, InstallError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self, InstallError> {
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        let raw: RawManifest = if is_yaml {
            serde_yaml::from_str(content).map_err(|err| InstallError::BadManifest {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?
        } else {
            serde_json::from_str(content).map_err(|err| InstallError::BadManifest {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?
        };

        let mut dependencies = BTreeMap::new();
        for (name, value) in raw.dependencies {
            let constraint =
                Constraint::from_str(&value).map_err(|message| InstallError::BadManifest {
                    path: path.to_path_buf(),
                    message,
                })?;
            dependencies.insert(name, constraint);
        }

        let services = match raw.services {
            None => Vec::new(),
            Some(RawServices::List(items)) => items
                .into_iter()
                .map(|item| match item {
                    RawServiceItem::Name(name) => ServiceDecl::bare(name),
                    RawServiceItem::Record(decl) => decl,
                })
                .collect(),
            Some(RawServices::Map(map)) => map
                .into_iter()
                .map(|(name, overrides)| ServiceDecl {
                    name,
                    auto_start: overrides.auto_start,
                    port: overrides.port,
                    env: overrides.env,
                    depends_on: overrides.depends_on,
                })
                .collect(),
        };

        Ok(Self {
            dependencies,
            services,
            global: raw.global,
            scripts: raw.scripts,
            exclude_dependencies: raw.exclude_dependencies,
            exclude_global_dependencies: raw.exclude_global_dependencies,
        })
    }
}

/// Walk upward from `start` looking for the first manifest file.
/// Returns `(manifest_path, project_dir)`.
pub fn discover(start: &Path) -> Option<(PathBuf, PathBuf)> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in MANIFEST_FILENAMES {
            let candidate = current.join(name);
            if candidate.is_file() {
                return Some((candidate, current.to_path_buf()));
            }
        }
        dir = current.parent();
    }
    None
}
