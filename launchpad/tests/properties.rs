//! Property-based tests for the core invariants.
//!
//! Fingerprints must be insensitive to declaration order and sensitive to
//! semantic change; activation must keep the env bin on PATH exactly once;
//! service start order must respect dependencies; unit rendering must be
//! deterministic.

use launchpad::config::ServicesConfig;
use launchpad::services::supervisor::Supervisor;
use launchpad::services::{find_definition, ServiceInstance};
use launchpad_install::activation::{compute_path, strip_path};
use launchpad_install::manifest::ServiceDecl;
use launchpad_install::{Arch, Fingerprint, Layout, Manifest, Os, Platform};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;

const PLATFORM: Platform = Platform {
    os: Os::Linux,
    arch: Arch::X86_64,
};

fn domain_strategy() -> impl Strategy<Value = String> {
    "[a-z]{2,8}\\.(sh|org|net|dev)"
}

fn version_strategy() -> impl Strategy<Value = String> {
    (0u64..10, 0u64..20, 0u64..20).prop_map(|(a, b, c)| format!("{a}.{b}.{c}"))
}

fn deps_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map(domain_strategy(), version_strategy(), 1..6)
        .prop_map(|map| map.into_iter().collect())
}

fn manifest_yaml(deps: &[(String, String)]) -> String {
    let mut yaml = String::from("dependencies:\n");
    for (domain, version) in deps {
        yaml.push_str(&format!("  {domain}: \"{version}\"\n"));
    }
    yaml
}

fn parse(yaml: &str) -> Manifest {
    Manifest::parse(Path::new("deps.yaml"), yaml).unwrap()
}

fn bin_dir_strategy() -> impl Strategy<Value = String> {
    "[a-z]{2,10}".prop_map(|name| format!("/envs/{name}/bin"))
}

proptest! {
    // ========================================================================
    // Fingerprint properties
    // ========================================================================

    #[test]
    fn fingerprint_ignores_declaration_order(mut deps in deps_strategy()) {
        let forward = parse(&manifest_yaml(&deps));
        deps.reverse();
        let reversed = parse(&manifest_yaml(&deps));

        prop_assert_eq!(
            Fingerprint::compute(&forward, PLATFORM),
            Fingerprint::compute(&reversed, PLATFORM)
        );
    }

    #[test]
    fn fingerprint_changes_with_any_version(
        deps in deps_strategy(),
        bump in 1u64..5,
    ) {
        let base = parse(&manifest_yaml(&deps));

        let mut changed = deps.clone();
        let (_, version) = changed.first_mut().unwrap();
        let mut parts: Vec<u64> = version.split('.').map(|p| p.parse().unwrap()).collect();
        parts[2] += bump;
        *version = format!("{}.{}.{}", parts[0], parts[1], parts[2]);
        let bumped = parse(&manifest_yaml(&changed));

        prop_assert_ne!(
            Fingerprint::compute(&base, PLATFORM),
            Fingerprint::compute(&bumped, PLATFORM)
        );
    }

    #[test]
    fn fingerprint_distinguishes_service_ports(
        deps in deps_strategy(),
        port_a in 1024u16..5000,
        port_b in 5001u16..9000,
    ) {
        let mut with_a = parse(&manifest_yaml(&deps));
        with_a.services.push(ServiceDecl { port: Some(port_a), ..ServiceDecl::bare("redis") });
        let mut with_b = parse(&manifest_yaml(&deps));
        with_b.services.push(ServiceDecl { port: Some(port_b), ..ServiceDecl::bare("redis") });

        prop_assert_ne!(
            Fingerprint::compute(&with_a, PLATFORM),
            Fingerprint::compute(&with_b, PLATFORM)
        );
    }

    // ========================================================================
    // PATH activation properties
    // ========================================================================

    #[test]
    fn env_bin_appears_exactly_once_after_any_activation_sequence(
        bins in prop::collection::vec(bin_dir_strategy(), 1..6),
    ) {
        let mut path = "/usr/bin:/bin".to_string();
        let mut previous: Option<String> = None;

        for bin in &bins {
            path = compute_path(&path, bin, previous.as_deref());
            previous = Some(bin.clone());

            let occurrences = path.split(':').filter(|segment| segment == bin).count();
            prop_assert_eq!(occurrences, 1, "bin {} in PATH {}", bin, path);
        }

        // deactivation removes every occurrence of the final bin
        let last = previous.unwrap();
        let deactivated = strip_path(&path, &last);
        prop_assert!(!deactivated.split(':').any(|segment| segment == last));
        prop_assert!(deactivated.contains("/usr/bin"));
    }

    // ========================================================================
    // Service ordering properties
    // ========================================================================

    #[test]
    fn start_order_respects_every_dependency_edge(
        edges in prop::collection::vec((1usize..6, 0usize..5), 0..10),
    ) {
        // Edges only point from a higher index to a lower one, so the
        // declaration set is acyclic by construction.
        let count = 6;
        let mut decls: Vec<ServiceDecl> = (0..count)
            .map(|index| ServiceDecl::bare(format!("svc{index}")))
            .collect();
        for (from, to) in &edges {
            let to = to % from;
            let dep = format!("svc{to}");
            if !decls[*from].depends_on.contains(&dep) {
                decls[*from].depends_on.push(dep);
            }
        }

        let ctx = launchpad::context::Context::new(
            launchpad::config::Config::default(),
            false,
            false,
        ).unwrap();
        let supervisor = Supervisor::new(&ctx, None);
        let instances = supervisor.instances(&decls, None);
        let order = Supervisor::start_order(&instances).unwrap();

        let position: BTreeMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(position, &index)| (instances[index].name(), position))
            .collect();
        for instance in &instances {
            for dep in &instance.definition.dependencies {
                prop_assert!(position[dep.as_str()] < position[instance.name()]);
            }
        }
    }

    // ========================================================================
    // Unit descriptor determinism
    // ========================================================================

    #[test]
    fn systemd_unit_rendering_is_deterministic(
        env in prop::collection::btree_map("[A-Z]{2,6}", "[a-z0-9 ]{0,12}", 0..5),
        port in 1024u16..9000,
    ) {
        let instance = ServiceInstance::new(
            find_definition("redis").unwrap(),
            &ServiceDecl { port: Some(port), ..ServiceDecl::bare("redis") },
            &Layout::new("/data", "/cache"),
            &ServicesConfig::default(),
            Some(("ab12cd34", "proj")),
        );
        let exe = Path::new("/envs/x/bin/redis-server");
        let args = vec!["--port".to_string(), port.to_string()];

        let first = launchpad::services::systemd::generate_unit(
            &instance, exe, &args, &env, "user", &ServicesConfig::default(), None,
        );
        let second = launchpad::services::systemd::generate_unit(
            &instance, exe, &args, &env, "user", &ServicesConfig::default(), None,
        );
        prop_assert_eq!(first, second);
    }
}
