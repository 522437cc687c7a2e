//! Dependency resolution.
//!
//! Turns a manifest into a flat, deduplicated, topologically ordered list of
//! concrete package versions, walking registry metadata breadth-first and
//! classifying every package as runtime or build-time.

use crate::error::InstallError;
use crate::manifest::{Constraint, Manifest};
use crate::platform::Platform;
use crate::registry::{ArtifactRef, DepKind, PackageRegistry};
use semver::Version;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub domain: String,
    pub version: Version,
    pub kind: DepKind,
    /// Indices into the resolution, always pointing backwards.
    pub depends_on: Vec<usize>,
    pub artifact: ArtifactRef,
    /// Binary basenames the package exposes, from registry metadata.
    pub programs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub packages: Vec<ResolvedPackage>,
}

impl Resolution {
    /// Packages needed at runtime, in emission order.
    pub fn runtime_packages(&self) -> impl Iterator<Item = &ResolvedPackage> {
        self.packages
            .iter()
            .filter(|p| p.kind == DepKind::Runtime)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    /// Honor build-time dependency edges (`LAUNCHPAD_INSTALL_BUILD_DEPS`).
    pub install_build_deps: bool,
    /// Domains removed from the resolution after dedup, before emission.
    pub exclude: BTreeSet<String>,
}

impl ResolverOptions {
    pub fn from_env() -> Self {
        Self {
            install_build_deps: std::env::var("LAUNCHPAD_INSTALL_BUILD_DEPS").as_deref()
                == Ok("1"),
            exclude: BTreeSet::new(),
        }
    }
}

struct Node {
    constraints: Vec<Constraint>,
    /// (child domain, edge kind), discovery order.
    edges: Vec<(String, DepKind)>,
    programs: Vec<String>,
}

pub async fn resolve(
    manifest: &Manifest,
    registry: &dyn PackageRegistry,
    platform: Platform,
    options: &ResolverOptions,
) -> Result<Resolution, InstallError> {
    let aliases = registry.aliases().await?;

    // Alias resolution for the top-level set. A key that is not an alias is
    // taken as a domain and validated by the registry lookup below.
    let mut roots: Vec<(String, Constraint)> = Vec::new();
    for (name, constraint) in &manifest.dependencies {
        let domain = aliases.get(name).cloned().unwrap_or_else(|| name.clone());
        roots.push((domain, constraint.clone()));
    }

    // Breadth-first transitive expansion over registry metadata. Constraints
    // accumulate per domain; edges keep their declared kind.
    let mut nodes: BTreeMap<String, Node> = BTreeMap::new();
    let mut queue: VecDeque<String> = VecDeque::new();

    for (domain, constraint) in &roots {
        nodes
            .entry(domain.clone())
            .or_insert_with(|| Node {
                constraints: Vec::new(),
                edges: Vec::new(),
                programs: Vec::new(),
            })
            .constraints
            .push(constraint.clone());
        if !queue.contains(domain) {
            queue.push_back(domain.clone());
        }
    }

    let mut expanded: BTreeSet<String> = BTreeSet::new();
    while let Some(domain) = queue.pop_front() {
        if !expanded.insert(domain.clone()) {
            continue;
        }
        let info = registry.get_package_info(&domain).await?;
        let node = nodes.get_mut(&domain).expect("queued domain has a node");
        node.programs = info.programs.clone();
        for dep in &info.dependencies {
            node.edges.push((dep.domain.clone(), dep.kind));
        }

        for dep in info.dependencies {
            let child = nodes.entry(dep.domain.clone()).or_insert_with(|| Node {
                constraints: Vec::new(),
                edges: Vec::new(),
                programs: Vec::new(),
            });
            child.constraints.push(dep.constraint);
            if !expanded.contains(&dep.domain) {
                queue.push_back(dep.domain);
            }
        }
    }

    // Runtime reachability: a package is runtime iff some path of runtime
    // edges connects it to the top-level set.
    let mut runtime: BTreeSet<String> = BTreeSet::new();
    let mut walk: VecDeque<String> = roots.iter().map(|(d, _)| d.clone()).collect();
    while let Some(domain) = walk.pop_front() {
        if !runtime.insert(domain.clone()) {
            continue;
        }
        if let Some(node) = nodes.get(&domain) {
            for (child, kind) in &node.edges {
                if *kind == DepKind::Runtime && !runtime.contains(child) {
                    walk.push_back(child.clone());
                }
            }
        }
    }

    // Build-time filtering, then explicit exclusions.
    let mut kept: BTreeSet<String> = nodes
        .keys()
        .filter(|domain| options.install_build_deps || runtime.contains(*domain))
        .cloned()
        .collect();
    for excluded in &options.exclude {
        if kept.remove(excluded) {
            debug!(domain = %excluded, "excluded from resolution");
        }
    }

    // Version selection: highest version satisfying every accumulated
    // constraint. `latest` constrains nothing, so a lone `latest` picks the
    // newest published version.
    let mut selected: BTreeMap<String, Version> = BTreeMap::new();
    for domain in &kept {
        let node = &nodes[domain];
        let versions = registry.enumerate_versions(domain).await?;
        let chosen = versions
            .iter()
            .find(|v| node.constraints.iter().all(|c| c.matches(v)));
        match chosen {
            Some(version) => {
                selected.insert(domain.clone(), version.clone());
            }
            None => {
                return Err(InstallError::VersionConflict {
                    domain: domain.clone(),
                    constraints: node
                        .constraints
                        .iter()
                        .map(Constraint::canonical)
                        .collect(),
                });
            }
        }
    }

    // Kahn's algorithm with an alphabetical ready set. Registry metadata may
    // contain cycles; when the ready set drains early the alphabetically
    // smallest remaining domain has its unsatisfied in-edges severed.
    let order = topo_order(&kept, &nodes);

    let index_of: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, d)| (d.as_str(), i))
        .collect();

    let mut packages = Vec::with_capacity(order.len());
    for (index, domain) in order.iter().enumerate() {
        let node = &nodes[domain];
        let version = selected[domain].clone();
        let artifact = registry.artifact_ref(domain, &version, platform).await?;
        let mut depends_on: Vec<usize> = node
            .edges
            .iter()
            .filter_map(|(child, _)| index_of.get(child.as_str()).copied())
            .filter(|child_index| *child_index < index)
            .collect();
        depends_on.sort_unstable();
        depends_on.dedup();

        packages.push(ResolvedPackage {
            domain: domain.clone(),
            version,
            kind: if runtime.contains(domain) {
                DepKind::Runtime
            } else {
                DepKind::Buildtime
            },
            depends_on,
            artifact,
            programs: node.programs.clone(),
        });
    }

    Ok(Resolution { packages })
}

/// Dependencies-first order over `kept`, alphabetical tie-break, cycles
/// broken at the back edge with a diagnostic.
fn topo_order(kept: &BTreeSet<String>, nodes: &BTreeMap<String, Node>) -> Vec<String> {
    let mut pending: BTreeMap<&str, usize> = kept
        .iter()
        .map(|domain| {
            let unmet = nodes[domain]
                .edges
                .iter()
                .filter(|(child, _)| kept.contains(child) && child != domain)
                .map(|(child, _)| child.clone())
                .collect::<BTreeSet<_>>()
                .len();
            (domain.as_str(), unmet)
        })
        .collect();

    // dependents[d] = domains that declare an edge onto d, distinct per pair
    // so a dependency listed twice is only decremented once.
    let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for domain in kept {
        for (child, _) in &nodes[domain].edges {
            if kept.contains(child) && child != domain {
                dependents
                    .entry(child.as_str())
                    .or_default()
                    .insert(domain.as_str());
            }
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, unmet)| **unmet == 0)
        .map(|(domain, _)| *domain)
        .collect();
    for domain in &ready {
        pending.remove(domain);
    }

    let mut order: Vec<String> = Vec::with_capacity(kept.len());
    while !ready.is_empty() || !pending.is_empty() {
        let next = match ready.iter().next().copied() {
            Some(domain) => {
                ready.remove(domain);
                domain
            }
            None => {
                // Cycle: sever the alphabetically smallest remaining node's
                // unmet edges and emit it.
                let (domain, _) = pending
                    .iter()
                    .next()
                    .map(|(d, u)| (*d, *u))
                    .expect("pending is non-empty");
                warn!(domain, "dependency cycle detected; breaking at back edge");
                pending.remove(domain);
                domain
            }
        };
        order.push(next.to_string());

        if let Some(parents) = dependents.get(next) {
            for parent in parents {
                if let Some(unmet) = pending.get_mut(parent) {
                    *unmet = unmet.saturating_sub(1);
                    if *unmet == 0 {
                        pending.remove(parent);
                        ready.insert(parent);
                    }
                }
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};
    use crate::registry::{StaticPackage, StaticRegistry};
    use std::path::Path;

    const PLATFORM: Platform = Platform {
        os: Os::Linux,
        arch: Arch::X86_64,
    };

    fn version(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn registry() -> StaticRegistry {
        let mut registry = StaticRegistry::new();
        registry
            .add_package(
                "bun.sh",
                StaticPackage {
                    versions: vec![version("1.3.1"), version("1.3.0"), version("1.2.9")],
                    programs: vec!["bun".to_string()],
                    dependencies: vec!["zlib.net^1.2".to_string()],
                    ..Default::default()
                },
            )
            .add_package(
                "zlib.net",
                StaticPackage {
                    versions: vec![version("1.3.1"), version("1.2.13")],
                    ..Default::default()
                },
            )
            .add_alias("bun", "bun.sh");
        for (domain, v) in [
            ("bun.sh", "1.3.1"),
            ("bun.sh", "1.3.0"),
            ("bun.sh", "1.2.9"),
            ("zlib.net", "1.3.1"),
            ("zlib.net", "1.2.13"),
        ] {
            registry.add_artifact(domain, v, format!("{domain}@{v}").into_bytes());
        }
        registry
    }

    fn manifest(yaml: &str) -> Manifest {
        Manifest::parse(Path::new("deps.yaml"), yaml).unwrap()
    }

    #[tokio::test]
    async fn resolves_aliases_and_transitive_deps_in_topo_order() {
        let registry = registry();
        let manifest = manifest("dependencies:\n  bun: \"^1.3\"\n");

        let resolution = resolve(
            &manifest,
            &registry,
            PLATFORM,
            &ResolverOptions::default(),
        )
        .await
        .unwrap();

        let domains: Vec<&str> = resolution
            .packages
            .iter()
            .map(|p| p.domain.as_str())
            .collect();
        assert_eq!(domains, vec!["zlib.net", "bun.sh"]);

        let bun = &resolution.packages[1];
        assert_eq!(bun.version, version("1.3.1"));
        assert_eq!(bun.depends_on, vec![0]);
        assert_eq!(bun.kind, DepKind::Runtime);
    }

    #[tokio::test]
    async fn exact_constraint_pins_version() {
        let registry = registry();
        let manifest = manifest("dependencies:\n  bun: \"=1.3.0\"\n");

        let resolution = resolve(
            &manifest,
            &registry,
            PLATFORM,
            &ResolverOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(resolution.packages[1].version, version("1.3.0"));
    }

    #[tokio::test]
    async fn unknown_package_surfaces() {
        let registry = registry();
        let manifest = manifest("dependencies:\n  ghost: \"*\"\n");

        let err = resolve(
            &manifest,
            &registry,
            PLATFORM,
            &ResolverOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InstallError::UnknownPackage(_)));
    }

    #[tokio::test]
    async fn conflicting_transitive_constraints_surface() {
        let mut registry = StaticRegistry::new();
        registry
            .add_package(
                "a.org",
                StaticPackage {
                    versions: vec![version("1.0.0")],
                    dependencies: vec!["x.org^1".to_string()],
                    ..Default::default()
                },
            )
            .add_package(
                "b.org",
                StaticPackage {
                    versions: vec![version("1.0.0")],
                    dependencies: vec!["x.org^2".to_string()],
                    ..Default::default()
                },
            )
            .add_package(
                "x.org",
                StaticPackage {
                    versions: vec![version("2.1.0"), version("1.9.0")],
                    ..Default::default()
                },
            );
        for (domain, v) in [("a.org", "1.0.0"), ("b.org", "1.0.0")] {
            registry.add_artifact(domain, v, b"x".to_vec());
        }

        let manifest = manifest("dependencies:\n  a.org: \"*\"\n  b.org: \"*\"\n");
        let err = resolve(
            &manifest,
            &registry,
            PLATFORM,
            &ResolverOptions::default(),
        )
        .await
        .unwrap_err();

        match err {
            InstallError::VersionConflict {
                domain,
                constraints,
            } => {
                assert_eq!(domain, "x.org");
                assert!(constraints.contains(&"^1".to_string()));
                assert!(constraints.contains(&"^2".to_string()));
            }
            other => panic!("expected VersionConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn build_deps_dropped_unless_enabled_or_runtime_reachable() {
        let mut registry = StaticRegistry::new();
        registry
            .add_package(
                "app.dev",
                StaticPackage {
                    versions: vec![version("1.0.0")],
                    dependencies: vec![
                        "build:gnu.org/make^4".to_string(),
                        "zlib.net^1".to_string(),
                    ],
                    ..Default::default()
                },
            )
            .add_package(
                "gnu.org/make",
                StaticPackage {
                    versions: vec![version("4.4.0")],
                    ..Default::default()
                },
            )
            .add_package(
                "zlib.net",
                StaticPackage {
                    versions: vec![version("1.3.1")],
                    ..Default::default()
                },
            );
        for (domain, v) in [
            ("app.dev", "1.0.0"),
            ("gnu.org/make", "4.4.0"),
            ("zlib.net", "1.3.1"),
        ] {
            registry.add_artifact(domain, v, b"x".to_vec());
        }

        let manifest = manifest("dependencies:\n  app.dev: \"*\"\n");

        let without = resolve(
            &manifest,
            &registry,
            PLATFORM,
            &ResolverOptions::default(),
        )
        .await
        .unwrap();
        let domains: Vec<&str> = without
            .packages
            .iter()
            .map(|p| p.domain.as_str())
            .collect();
        assert!(!domains.contains(&"gnu.org/make"));

        let with = resolve(
            &manifest,
            &registry,
            PLATFORM,
            &ResolverOptions {
                install_build_deps: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let domains: Vec<&str> = with.packages.iter().map(|p| p.domain.as_str()).collect();
        assert!(domains.contains(&"gnu.org/make"));
        let make = with
            .packages
            .iter()
            .find(|p| p.domain == "gnu.org/make")
            .unwrap();
        assert_eq!(make.kind, DepKind::Buildtime);
    }

    #[tokio::test]
    async fn exclusions_apply_before_emission() {
        let registry = registry();
        let manifest = manifest("dependencies:\n  bun: \"^1.3\"\n");

        let mut options = ResolverOptions::default();
        options.exclude.insert("zlib.net".to_string());

        let resolution = resolve(&manifest, &registry, PLATFORM, &options)
            .await
            .unwrap();
        let domains: Vec<&str> = resolution
            .packages
            .iter()
            .map(|p| p.domain.as_str())
            .collect();
        assert_eq!(domains, vec!["bun.sh"]);
        assert!(resolution.packages[0].depends_on.is_empty());
    }

    #[tokio::test]
    async fn cycles_break_and_stay_acyclic() {
        let mut registry = StaticRegistry::new();
        registry
            .add_package(
                "a.org",
                StaticPackage {
                    versions: vec![version("1.0.0")],
                    dependencies: vec!["b.org^1".to_string()],
                    ..Default::default()
                },
            )
            .add_package(
                "b.org",
                StaticPackage {
                    versions: vec![version("1.0.0")],
                    dependencies: vec!["a.org^1".to_string()],
                    ..Default::default()
                },
            );
        registry.add_artifact("a.org", "1.0.0", b"a".to_vec());
        registry.add_artifact("b.org", "1.0.0", b"b".to_vec());

        let manifest = manifest("dependencies:\n  a.org: \"^1\"\n");
        let resolution = resolve(
            &manifest,
            &registry,
            PLATFORM,
            &ResolverOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(resolution.packages.len(), 2);
        for (index, package) in resolution.packages.iter().enumerate() {
            for dep in &package.depends_on {
                assert!(*dep < index, "forward reference in depends_on");
            }
        }
    }

    #[tokio::test]
    async fn topological_property_holds_for_diamond() {
        let mut registry = StaticRegistry::new();
        registry
            .add_package(
                "top.dev",
                StaticPackage {
                    versions: vec![version("1.0.0")],
                    dependencies: vec!["left.dev^1".to_string(), "right.dev^1".to_string()],
                    ..Default::default()
                },
            )
            .add_package(
                "left.dev",
                StaticPackage {
                    versions: vec![version("1.0.0")],
                    dependencies: vec!["base.dev^1".to_string()],
                    ..Default::default()
                },
            )
            .add_package(
                "right.dev",
                StaticPackage {
                    versions: vec![version("1.0.0")],
                    dependencies: vec!["base.dev^1".to_string()],
                    ..Default::default()
                },
            )
            .add_package(
                "base.dev",
                StaticPackage {
                    versions: vec![version("1.0.0")],
                    ..Default::default()
                },
            );
        for domain in ["top.dev", "left.dev", "right.dev", "base.dev"] {
            registry.add_artifact(domain, "1.0.0", domain.as_bytes().to_vec());
        }

        let manifest = manifest("dependencies:\n  top.dev: \"^1\"\n");
        let resolution = resolve(
            &manifest,
            &registry,
            PLATFORM,
            &ResolverOptions::default(),
        )
        .await
        .unwrap();

        let position: HashMap<&str, usize> = resolution
            .packages
            .iter()
            .enumerate()
            .map(|(i, p)| (p.domain.as_str(), i))
            .collect();
        assert!(position["base.dev"] < position["left.dev"]);
        assert!(position["base.dev"] < position["right.dev"]);
        assert!(position["left.dev"] < position["top.dev"]);
        assert!(position["right.dev"] < position["top.dev"]);
        // alphabetical tie-break between the two mid-tier packages
        assert!(position["left.dev"] < position["right.dev"]);
    }
}
