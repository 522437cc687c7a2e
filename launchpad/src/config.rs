//! User configuration.
//!
//! A typed record loaded from `~/.config/launchpad/config.json`, overridden
//! by environment variables, falling back to defaults. Dotted key paths
//! (`services.startupTimeout`) address nested fields through an enumerated
//! accessor table; writes through an unknown key are rejected rather than
//! stored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub install_path: Option<PathBuf>,
    pub verbose: bool,
    pub force_reinstall: bool,
    pub install_dependencies: bool,
    pub auto_add_to_path: bool,
    pub shim_path: Option<PathBuf>,
    pub services: ServicesConfig,
    pub exclude_dependencies: Vec<String>,
    pub exclude_global_dependencies: Vec<String>,
    pub profiles: ProfilesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            install_path: None,
            verbose: false,
            force_reinstall: false,
            install_dependencies: true,
            auto_add_to_path: true,
            shim_path: None,
            services: ServicesConfig::default(),
            exclude_dependencies: Vec::new(),
            exclude_global_dependencies: Vec::new(),
            profiles: ProfilesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServicesConfig {
    pub log_dir: Option<PathBuf>,
    pub auto_restart: bool,
    pub startup_timeout: u64,
    pub shutdown_timeout: u64,
    pub database: DatabaseConfig,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            auto_restart: true,
            startup_timeout: 30,
            shutdown_timeout: 10,
            database: DatabaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub username: String,
    pub password: String,
    pub auth_method: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            username: "launchpad".to_string(),
            password: String::new(),
            auth_method: "trust".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfilesConfig {
    pub active: Option<String>,
    pub custom: BTreeMap<String, Value>,
}

/// Every addressable key path, in display order.
pub const KEY_PATHS: &[&str] = &[
    "installPath",
    "verbose",
    "forceReinstall",
    "installDependencies",
    "autoAddToPath",
    "shimPath",
    "services.logDir",
    "services.autoRestart",
    "services.startupTimeout",
    "services.shutdownTimeout",
    "services.database.username",
    "services.database.password",
    "services.database.authMethod",
    "excludeDependencies",
    "excludeGlobalDependencies",
    "profiles.active",
];

impl Config {
    pub fn config_file() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("launchpad")
            .join("config.json")
    }

    /// File -> environment -> result. Missing file means defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(Self::config_file()) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => return Err(err.into()),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let json = serde_json::to_vec_pretty(self)?;
        launchpad_common::fsx::write_atomic(&Self::config_file(), &json)
            .map_err(|err| ConfigError::Io(std::io::Error::other(err)))
    }

    /// Environment variables take priority: `LAUNCHPAD_` + the key path with
    /// dots as underscores, upper snake case (`services.startupTimeout` ->
    /// `LAUNCHPAD_SERVICES_STARTUP_TIMEOUT`).
    fn apply_env(&mut self) {
        for key in KEY_PATHS {
            if let Ok(value) = std::env::var(env_var_for(key)) {
                // An unparseable env value is ignored rather than fatal.
                let _ = self.set_by_path(key, &value);
            }
        }
    }

    pub fn get_by_path(&self, key: &str) -> Result<Value, ConfigError> {
        let value = match key {
            "installPath" => json_opt_path(&self.install_path),
            "verbose" => Value::Bool(self.verbose),
            "forceReinstall" => Value::Bool(self.force_reinstall),
            "installDependencies" => Value::Bool(self.install_dependencies),
            "autoAddToPath" => Value::Bool(self.auto_add_to_path),
            "shimPath" => json_opt_path(&self.shim_path),
            "services.logDir" => json_opt_path(&self.services.log_dir),
            "services.autoRestart" => Value::Bool(self.services.auto_restart),
            "services.startupTimeout" => Value::from(self.services.startup_timeout),
            "services.shutdownTimeout" => Value::from(self.services.shutdown_timeout),
            "services.database.username" => Value::from(self.services.database.username.clone()),
            "services.database.password" => Value::from(self.services.database.password.clone()),
            "services.database.authMethod" => {
                Value::from(self.services.database.auth_method.clone())
            }
            "excludeDependencies" => Value::from(self.exclude_dependencies.clone()),
            "excludeGlobalDependencies" => Value::from(self.exclude_global_dependencies.clone()),
            "profiles.active" => self
                .profiles
                .active
                .clone()
                .map(Value::from)
                .unwrap_or(Value::Null),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        };
        Ok(value)
    }

    /// Write one key. The raw string auto-parses: `true`/`false`/`null`/
    /// numbers/JSON arrays become their typed form, anything else is a
    /// string.
    pub fn set_by_path(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let value = parse_value(raw);
        match key {
            "installPath" => self.install_path = as_opt_path(key, value)?,
            "verbose" => self.verbose = as_bool(key, value)?,
            "forceReinstall" => self.force_reinstall = as_bool(key, value)?,
            "installDependencies" => self.install_dependencies = as_bool(key, value)?,
            "autoAddToPath" => self.auto_add_to_path = as_bool(key, value)?,
            "shimPath" => self.shim_path = as_opt_path(key, value)?,
            "services.logDir" => self.services.log_dir = as_opt_path(key, value)?,
            "services.autoRestart" => self.services.auto_restart = as_bool(key, value)?,
            "services.startupTimeout" => self.services.startup_timeout = as_u64(key, value)?,
            "services.shutdownTimeout" => self.services.shutdown_timeout = as_u64(key, value)?,
            "services.database.username" => {
                self.services.database.username = as_string(key, value)?
            }
            "services.database.password" => {
                self.services.database.password = as_string(key, value)?
            }
            "services.database.authMethod" => {
                self.services.database.auth_method = as_string(key, value)?
            }
            "excludeDependencies" => self.exclude_dependencies = as_string_list(key, value)?,
            "excludeGlobalDependencies" => {
                self.exclude_global_dependencies = as_string_list(key, value)?
            }
            "profiles.active" => {
                self.profiles.active = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => {
                        return Err(invalid(key, &other, "string or null"));
                    }
                }
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

pub fn env_var_for(key: &str) -> String {
    let mut name = String::from("LAUNCHPAD");
    for part in key.split('.') {
        name.push('_');
        for ch in part.chars() {
            if ch.is_ascii_uppercase() {
                name.push('_');
            }
            name.push(ch.to_ascii_uppercase());
        }
    }
    name
}

fn parse_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => {
            if let Ok(number) = raw.parse::<i64>() {
                return Value::from(number);
            }
            if raw.starts_with('[') || raw.starts_with('{') {
                if let Ok(value) = serde_json::from_str(raw) {
                    return value;
                }
            }
            Value::String(raw.to_string())
        }
    }
}

fn invalid(key: &str, value: &Value, wanted: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected {wanted}, got {value}"),
    }
}

fn json_opt_path(path: &Option<PathBuf>) -> Value {
    path.as_ref()
        .map(|p| Value::from(p.to_string_lossy().into_owned()))
        .unwrap_or(Value::Null)
}

fn as_bool(key: &str, value: Value) -> Result<bool, ConfigError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(invalid(key, &other, "true or false")),
    }
}

fn as_u64(key: &str, value: Value) -> Result<u64, ConfigError> {
    value
        .as_u64()
        .ok_or_else(|| invalid(key, &value, "a non-negative number"))
}

fn as_string(key: &str, value: Value) -> Result<String, ConfigError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(invalid(key, &other, "a string")),
    }
}

fn as_opt_path(key: &str, value: Value) -> Result<Option<PathBuf>, ConfigError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(PathBuf::from(s))),
        other => Err(invalid(key, &other, "a path or null")),
    }
}

fn as_string_list(key: &str, value: Value) -> Result<Vec<String>, ConfigError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(invalid(key, &other, "a string")),
            })
            .collect(),
        Value::String(s) => Ok(vec![s]),
        other => Err(invalid(key, &other, "a JSON array of strings")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert!(config.install_dependencies);
        assert!(config.auto_add_to_path);
        assert_eq!(config.services.startup_timeout, 30);
        assert_eq!(config.services.database.auth_method, "trust");
    }

    #[test]
    fn round_trip_by_path() {
        let mut config = Config::default();
        config.set_by_path("verbose", "true").unwrap();
        config
            .set_by_path("services.startupTimeout", "60")
            .unwrap();
        config
            .set_by_path("excludeDependencies", r#"["php.net"]"#)
            .unwrap();
        config.set_by_path("installPath", "/opt/lp").unwrap();

        assert_eq!(config.get_by_path("verbose").unwrap(), Value::Bool(true));
        assert_eq!(
            config.get_by_path("services.startupTimeout").unwrap(),
            Value::from(60)
        );
        assert_eq!(
            config.get_by_path("excludeDependencies").unwrap(),
            Value::from(vec!["php.net".to_string()])
        );
        assert_eq!(
            config.get_by_path("installPath").unwrap(),
            Value::from("/opt/lp")
        );
    }

    #[test]
    fn unknown_keys_rejected_at_write_time() {
        let mut config = Config::default();
        let err = config.set_by_path("doesNot.exist", "1").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(_)));
        assert!(config.get_by_path("doesNot.exist").is_err());
    }

    #[test]
    fn type_mismatch_rejected() {
        let mut config = Config::default();
        let err = config
            .set_by_path("services.startupTimeout", "soon")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn null_clears_optional_values() {
        let mut config = Config::default();
        config.set_by_path("shimPath", "/shims").unwrap();
        config.set_by_path("shimPath", "null").unwrap();
        assert_eq!(config.get_by_path("shimPath").unwrap(), Value::Null);
    }

    #[test]
    fn env_var_names_are_upper_snake() {
        assert_eq!(env_var_for("verbose"), "LAUNCHPAD_VERBOSE");
        assert_eq!(
            env_var_for("services.startupTimeout"),
            "LAUNCHPAD_SERVICES_STARTUP_TIMEOUT"
        );
        assert_eq!(
            env_var_for("services.database.authMethod"),
            "LAUNCHPAD_SERVICES_DATABASE_AUTH_METHOD"
        );
    }

    #[test]
    fn config_serializes_camel_case() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert!(json.get("installDependencies").is_some());
        assert!(json["services"].get("startupTimeout").is_some());
    }
}
