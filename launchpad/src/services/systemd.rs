//! systemd user-unit generation (Linux).
//!
//! INI-format descriptor with a fixed section and key order; env vars are
//! sorted so the same instance always renders byte-identically.

use super::ServiceInstance;
use crate::config::ServicesConfig;
use launchpad_install::Os;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

pub fn generate_unit(
    instance: &ServiceInstance,
    executable: &Path,
    args: &[String],
    env: &BTreeMap<String, String>,
    user: &str,
    services_config: &ServicesConfig,
    exec_stop: Option<&str>,
) -> String {
    let mut unit = String::with_capacity(1024);

    writeln!(unit, "[Unit]").ok();
    writeln!(unit, "Description={}", instance.definition.display_name).ok();
    let mut after = vec!["network.target".to_string()];
    let mut wants = Vec::new();
    for dep in &instance.definition.dependencies {
        let dep_unit = instance.dependency_unit(dep, Os::Linux);
        after.push(dep_unit.clone());
        wants.push(dep_unit);
    }
    writeln!(unit, "After={}", after.join(" ")).ok();
    if !wants.is_empty() {
        writeln!(unit, "Wants={}", wants.join(" ")).ok();
    }
    writeln!(unit).ok();

    writeln!(unit, "[Service]").ok();
    writeln!(unit, "Type=simple").ok();
    let mut exec_start = quote_systemd(&executable.to_string_lossy());
    for arg in args {
        exec_start.push(' ');
        exec_start.push_str(&quote_systemd(arg));
    }
    writeln!(unit, "ExecStart={exec_start}").ok();
    if let Some(stop) = exec_stop {
        writeln!(unit, "ExecStop={stop}").ok();
    }
    writeln!(
        unit,
        "WorkingDirectory={}",
        instance.data_dir.to_string_lossy()
    )
    .ok();
    for (key, value) in env {
        writeln!(unit, "Environment={}", quote_systemd(&format!("{key}={value}"))).ok();
    }
    writeln!(unit, "User={user}").ok();
    writeln!(
        unit,
        "Restart={}",
        if services_config.auto_restart {
            "on-failure"
        } else {
            "no"
        }
    )
    .ok();
    writeln!(unit, "RestartSec=5").ok();
    writeln!(unit, "TimeoutStartSec={}", services_config.startup_timeout).ok();
    writeln!(unit, "TimeoutStopSec={}", services_config.shutdown_timeout).ok();
    writeln!(unit, "PIDFile={}", instance.pid_file.to_string_lossy()).ok();
    writeln!(unit).ok();

    writeln!(unit, "[Install]").ok();
    if instance.enabled {
        writeln!(unit, "WantedBy=multi-user.target").ok();
    }

    unit
}

/// Systemd quoting: wrap in double quotes when the value carries whitespace
/// or quotes, escaping embedded quotes.
fn quote_systemd(value: &str) -> String {
    if value.contains(' ') || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::find_definition;
    use launchpad_install::manifest::ServiceDecl;
    use launchpad_install::Layout;
    use std::path::PathBuf;

    fn instance_with_deps() -> ServiceInstance {
        let mut definition = find_definition("redis").unwrap();
        definition.name = "my-api".to_string();
        definition.display_name = "My API".to_string();
        definition.dependencies = vec!["postgres".to_string()];
        ServiceInstance::new(
            definition,
            &ServiceDecl::bare("my-api"),
            &Layout::new("/data", "/cache"),
            &ServicesConfig::default(),
            Some(("ab12cd34", "proj")),
        )
    }

    #[test]
    fn unit_lists_dependencies_in_after_and_wants() {
        let unit = generate_unit(
            &instance_with_deps(),
            &PathBuf::from("/envs/x/bin/my-api"),
            &[],
            &BTreeMap::new(),
            "user",
            &ServicesConfig::default(),
            None,
        );

        assert!(unit.contains("[Unit]"));
        assert!(unit
            .contains("After=network.target launchpad-ab12cd34-postgres.service"));
        assert!(unit.contains("Wants=launchpad-ab12cd34-postgres.service"));
        assert!(unit.contains("Type=simple"));
        assert!(unit.contains("ExecStart=/envs/x/bin/my-api"));
        assert!(unit.contains("Restart=on-failure"));
        assert!(unit.contains("RestartSec=5"));
        assert!(unit.contains("TimeoutStartSec=30"));
        assert!(unit.contains("TimeoutStopSec=10"));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn disabled_instance_omits_wantedby() {
        let mut inst = instance_with_deps();
        inst.enabled = false;
        let unit = generate_unit(
            &inst,
            &PathBuf::from("/bin/my-api"),
            &[],
            &BTreeMap::new(),
            "user",
            &ServicesConfig::default(),
            None,
        );
        assert!(unit.contains("[Install]"));
        assert!(!unit.contains("WantedBy="));
    }

    #[test]
    fn auto_restart_off_renders_restart_no() {
        let config = ServicesConfig {
            auto_restart: false,
            ..Default::default()
        };
        let unit = generate_unit(
            &instance_with_deps(),
            &PathBuf::from("/bin/my-api"),
            &[],
            &BTreeMap::new(),
            "user",
            &config,
            None,
        );
        assert!(unit.contains("Restart=no"));
    }

    #[test]
    fn environment_lines_are_sorted_and_quoted() {
        let env = BTreeMap::from([
            ("ZED".to_string(), "with space".to_string()),
            ("ABC".to_string(), "plain".to_string()),
        ]);
        let unit = generate_unit(
            &instance_with_deps(),
            &PathBuf::from("/bin/my-api"),
            &[],
            &env,
            "user",
            &ServicesConfig::default(),
            None,
        );
        let abc = unit.find("Environment=ABC=plain").unwrap();
        let zed = unit.find("Environment=\"ZED=with space\"").unwrap();
        assert!(abc < zed);
    }

    #[test]
    fn generation_is_deterministic() {
        let inst = instance_with_deps();
        let exe = PathBuf::from("/bin/my-api");
        let env = BTreeMap::from([("A".to_string(), "1".to_string())]);
        let first = generate_unit(
            &inst,
            &exe,
            &["--flag".to_string()],
            &env,
            "user",
            &ServicesConfig::default(),
            Some("/bin/my-api --stop"),
        );
        let second = generate_unit(
            &inst,
            &exe,
            &["--flag".to_string()],
            &env,
            "user",
            &ServicesConfig::default(),
            Some("/bin/my-api --stop"),
        );
        assert_eq!(first, second);
        assert!(first.contains("ExecStop=/bin/my-api --stop"));
    }
}
