//! Service definitions and instances.
//!
//! A [`ServiceDefinition`] is a static description (from the built-in
//! catalog or a manifest); a [`ServiceInstance`] is that definition bound to
//! concrete paths, a port, and optionally a project hash for per-project
//! isolation. Instances are in-memory per invocation; the durable artifact
//! is the generated OS unit descriptor.

pub mod health;
pub mod launchd;
pub mod placeholders;
pub mod supervisor;
pub mod systemd;

use crate::config::ServicesConfig;
use launchpad_install::manifest::ServiceDecl;
use launchpad_install::{Layout, Os};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("cyclic service dependency: {}", chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },
    #[error("service already running: {0}")]
    AlreadyRunning(String),
    #[error("service not running: {0}")]
    NotRunning(String),
    #[error("health check for {service} did not pass after {attempts} attempts")]
    HealthCheckFailed { service: String, attempts: u32 },
    #[error("missing dependency: {tool} ({hint})")]
    MissingDependency { tool: String, hint: String },
    #[error("service manager error: {0}")]
    Manager(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
    Unknown,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Failed => "failed",
            ServiceState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Probe argv; placeholders are expanded before execution.
    pub command: Vec<String>,
    pub interval_secs: u64,
    pub retries: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub display_name: String,
    pub package_domain: String,
    pub executable: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub data_directory: Option<String>,
    pub config_file: Option<String>,
    pub log_file: Option<String>,
    pub pid_file: Option<String>,
    pub port: Option<u16>,
    /// Names of services (or package domains) that must be up first.
    pub dependencies: Vec<String>,
    pub health_check: Option<HealthCheck>,
    /// Runs once when the data directory is empty.
    pub init_command: Option<Vec<String>>,
    pub post_start_commands: Vec<Vec<String>>,
    pub supports_graceful_shutdown: bool,
    /// Extra placeholder keys available to args/env expansion.
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub definition: ServiceDefinition,
    pub config_overrides: BTreeMap<String, String>,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
    pub state: ServiceState,
    pub enabled: bool,
    pub pid: Option<u32>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub project_hash: Option<String>,
    pub project_name: Option<String>,
}

impl ServiceInstance {
    pub fn new(
        definition: ServiceDefinition,
        decl: &ServiceDecl,
        layout: &Layout,
        services_config: &ServicesConfig,
        project: Option<(&str, &str)>,
    ) -> Self {
        let (project_hash, project_name) = match project {
            Some((hash, name)) => (Some(hash.to_string()), Some(name.to_string())),
            None => (None, None),
        };
        let scoped = match &project_hash {
            Some(hash) => format!("{hash}-{}", definition.name),
            None => definition.name.clone(),
        };

        // A definition may pin its own paths; otherwise they derive from the
        // layout, scoped by the project hash.
        let data_dir = match &definition.data_directory {
            Some(dir) => PathBuf::from(dir),
            None => layout.service_data_dir(&scoped),
        };
        let log_file = match (&definition.log_file, &services_config.log_dir) {
            (Some(file), _) => PathBuf::from(file),
            (None, Some(dir)) => dir.join(format!("{scoped}.log")),
            (None, None) => layout.service_log_file(&scoped),
        };
        let pid_file = match &definition.pid_file {
            Some(file) => PathBuf::from(file),
            None => data_dir.join(format!("{}.pid", definition.name)),
        };

        let mut config_overrides = BTreeMap::new();
        if let Some(port) = decl.port.or(definition.port) {
            config_overrides.insert("port".to_string(), port.to_string());
        }
        for (key, value) in &decl.env {
            config_overrides.insert(key.clone(), value.clone());
        }

        Self {
            definition,
            config_overrides,
            data_dir,
            log_file,
            pid_file,
            state: ServiceState::Unknown,
            enabled: decl.auto_start,
            pid: None,
            started_at: None,
            project_hash,
            project_name,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn port(&self) -> Option<u16> {
        self.config_overrides
            .get("port")
            .and_then(|p| p.parse().ok())
            .or(self.definition.port)
    }

    /// OS unit label: `com.launchpad.{hash}.{name}` on macOS,
    /// `launchpad-{hash}-{name}` on Linux; unprefixed outside a project.
    pub fn unit_label(&self, os: Os) -> String {
        let name = self.name();
        match (os, &self.project_hash) {
            (Os::MacOs, Some(hash)) => format!("com.launchpad.{hash}.{name}"),
            (Os::MacOs, None) => format!("com.launchpad.{name}"),
            (Os::Linux, Some(hash)) => format!("launchpad-{hash}-{name}"),
            (Os::Linux, None) => format!("launchpad-{name}"),
        }
    }

    /// Unit file name for the label (`.plist` / `.service`).
    pub fn unit_file_name(&self, os: Os) -> String {
        match os {
            Os::MacOs => format!("{}.plist", self.unit_label(os)),
            Os::Linux => format!("{}.service", self.unit_label(os)),
        }
    }

    /// Where the unit descriptor is installed for the current user.
    pub fn unit_path(&self, os: Os) -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        match os {
            Os::MacOs => home
                .join("Library/LaunchAgents")
                .join(self.unit_file_name(os)),
            Os::Linux => home
                .join(".config/systemd/user")
                .join(self.unit_file_name(os)),
        }
    }

    /// Unit label of a dependency, scoped with the same project hash.
    pub fn dependency_unit(&self, dep: &str, os: Os) -> String {
        let scoped = match (&self.project_hash, os) {
            (Some(hash), Os::MacOs) => format!("com.launchpad.{hash}.{dep}"),
            (None, Os::MacOs) => format!("com.launchpad.{dep}"),
            (Some(hash), Os::Linux) => format!("launchpad-{hash}-{dep}"),
            (None, Os::Linux) => format!("launchpad-{dep}"),
        };
        match os {
            Os::MacOs => scoped,
            Os::Linux => format!("{scoped}.service"),
        }
    }
}

/// Built-in service catalog.
pub fn catalog() -> Vec<ServiceDefinition> {
    vec![
        ServiceDefinition {
            name: "postgres".to_string(),
            display_name: "PostgreSQL".to_string(),
            package_domain: "postgresql.org".to_string(),
            executable: "postgres".to_string(),
            args: vec![
                "-D".to_string(),
                "{dataDir}".to_string(),
                "-k".to_string(),
                "{dataDir}".to_string(),
                "-p".to_string(),
                "{port}".to_string(),
            ],
            env: BTreeMap::from([("PGDATA".to_string(), "{dataDir}".to_string())]),
            port: Some(5432),
            health_check: Some(HealthCheck {
                command: vec![
                    "pg_isready".to_string(),
                    "-h".to_string(),
                    "127.0.0.1".to_string(),
                    "-p".to_string(),
                    "{port}".to_string(),
                ],
                interval_secs: 1,
                retries: 30,
                timeout_secs: 5,
            }),
            init_command: Some(vec![
                "initdb".to_string(),
                "-D".to_string(),
                "{dataDir}".to_string(),
                "-U".to_string(),
                "{dbUsername}".to_string(),
                "-A".to_string(),
                "{authMethod}".to_string(),
            ]),
            post_start_commands: vec![vec![
                "createdb".to_string(),
                "-h".to_string(),
                "127.0.0.1".to_string(),
                "-p".to_string(),
                "{port}".to_string(),
                "-U".to_string(),
                "{dbUsername}".to_string(),
                "{projectDatabase}".to_string(),
            ]],
            supports_graceful_shutdown: true,
            ..Default::default()
        },
        ServiceDefinition {
            name: "redis".to_string(),
            display_name: "Redis".to_string(),
            package_domain: "redis.io".to_string(),
            executable: "redis-server".to_string(),
            args: vec![
                "--port".to_string(),
                "{port}".to_string(),
                "--dir".to_string(),
                "{dataDir}".to_string(),
                "--pidfile".to_string(),
                "{pidFile}".to_string(),
            ],
            port: Some(6379),
            health_check: Some(HealthCheck {
                command: vec![
                    "redis-cli".to_string(),
                    "-p".to_string(),
                    "{port}".to_string(),
                    "ping".to_string(),
                ],
                interval_secs: 1,
                retries: 15,
                timeout_secs: 3,
            }),
            supports_graceful_shutdown: true,
            ..Default::default()
        },
        ServiceDefinition {
            name: "memcached".to_string(),
            display_name: "Memcached".to_string(),
            package_domain: "memcached.org".to_string(),
            executable: "memcached".to_string(),
            args: vec![
                "-p".to_string(),
                "{port}".to_string(),
                "-P".to_string(),
                "{pidFile}".to_string(),
            ],
            port: Some(11211),
            ..Default::default()
        },
        ServiceDefinition {
            name: "caddy".to_string(),
            display_name: "Caddy".to_string(),
            package_domain: "caddyserver.com".to_string(),
            executable: "caddy".to_string(),
            args: vec![
                "run".to_string(),
                "--config".to_string(),
                "{configFile}".to_string(),
            ],
            config_file: Some("{dataDir}/Caddyfile".to_string()),
            port: Some(2015),
            ..Default::default()
        },
    ]
}

/// Look a definition up in the built-in catalog.
pub fn find_definition(name: &str) -> Result<ServiceDefinition, ServiceError> {
    catalog()
        .into_iter()
        .find(|definition| definition.name == name)
        .ok_or_else(|| ServiceError::UnknownService(name.to_string()))
}
