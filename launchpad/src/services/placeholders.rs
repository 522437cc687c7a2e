//! Placeholder expansion for service args, env values, and commands.
//!
//! Templates may reference `{dataDir}`, `{configFile}`, `{logFile}`,
//! `{pidFile}`, `{port}`, `{projectDatabase}`, `{dbUsername}`,
//! `{dbPassword}`, `{masterKey}`, `{authMethod}`, `{projectName}`, and any
//! key in the definition's `config` map. Unrecognized placeholders pass
//! through untouched.

use super::ServiceInstance;
use crate::config::DatabaseConfig;
use std::collections::BTreeMap;

pub fn placeholder_map(
    instance: &ServiceInstance,
    database: &DatabaseConfig,
) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(
        "dataDir".to_string(),
        instance.data_dir.to_string_lossy().into_owned(),
    );
    map.insert(
        "logFile".to_string(),
        instance.log_file.to_string_lossy().into_owned(),
    );
    map.insert(
        "pidFile".to_string(),
        instance.pid_file.to_string_lossy().into_owned(),
    );
    if let Some(port) = instance.port() {
        map.insert("port".to_string(), port.to_string());
    }

    let project_name = instance
        .project_name
        .clone()
        .unwrap_or_else(|| "default".to_string());
    map.insert(
        "projectDatabase".to_string(),
        project_name.replace(['-', '.'], "_"),
    );
    map.insert("projectName".to_string(), project_name);

    map.insert("dbUsername".to_string(), database.username.clone());
    map.insert("dbPassword".to_string(), database.password.clone());
    map.insert("authMethod".to_string(), database.auth_method.clone());
    map.insert("masterKey".to_string(), database.password.clone());

    // Definition-level config keys and per-declaration overrides win over
    // the derived values above.
    for (key, value) in &instance.definition.config {
        map.insert(key.clone(), value.clone());
    }
    for (key, value) in &instance.config_overrides {
        map.insert(key.clone(), value.clone());
    }

    // configFile may itself contain {dataDir}; expand it against the map so
    // far before publishing it.
    if let Some(config_file) = &instance.definition.config_file {
        let expanded = expand(config_file, &map);
        map.insert("configFile".to_string(), expanded);
    }

    map
}

/// Replace every `{key}` occurrence from `map`.
pub fn expand(template: &str, map: &BTreeMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match map.get(key) {
                    Some(value) => result.push_str(value),
                    None => {
                        result.push('{');
                        result.push_str(key);
                        result.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                result.push_str(&rest[open..]);
                return result;
            }
        }
    }
    result.push_str(rest);
    result
}

pub fn expand_all(templates: &[String], map: &BTreeMap<String, String>) -> Vec<String> {
    templates.iter().map(|t| expand(t, map)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServicesConfig;
    use crate::services::find_definition;
    use launchpad_install::manifest::ServiceDecl;
    use launchpad_install::Layout;

    fn redis_instance() -> ServiceInstance {
        ServiceInstance::new(
            find_definition("redis").unwrap(),
            &ServiceDecl {
                port: Some(6380),
                ..ServiceDecl::bare("redis")
            },
            &Layout::new("/data", "/cache"),
            &ServicesConfig::default(),
            Some(("ab12cd34", "my-proj")),
        )
    }

    #[test]
    fn expand_replaces_known_and_keeps_unknown() {
        let map = BTreeMap::from([("port".to_string(), "6379".to_string())]);
        assert_eq!(expand("--port {port}", &map), "--port 6379");
        assert_eq!(expand("{mystery}", &map), "{mystery}");
        assert_eq!(expand("no placeholders", &map), "no placeholders");
        assert_eq!(expand("dangling {brace", &map), "dangling {brace");
    }

    #[test]
    fn map_carries_instance_paths_and_overrides() {
        let instance = redis_instance();
        let map = placeholder_map(&instance, &DatabaseConfig::default());

        assert_eq!(map["port"], "6380");
        assert_eq!(map["dataDir"], "/data/services/ab12cd34-redis");
        assert_eq!(map["projectName"], "my-proj");
        assert_eq!(map["projectDatabase"], "my_proj");
        assert_eq!(map["dbUsername"], "launchpad");
    }

    #[test]
    fn args_expand_end_to_end() {
        let instance = redis_instance();
        let map = placeholder_map(&instance, &DatabaseConfig::default());
        let args = expand_all(&instance.definition.args, &map);
        assert!(args.contains(&"6380".to_string()));
        assert!(args.contains(&"/data/services/ab12cd34-redis".to_string()));
    }

    #[test]
    fn config_file_placeholder_is_pre_expanded() {
        let instance = ServiceInstance::new(
            find_definition("caddy").unwrap(),
            &ServiceDecl::bare("caddy"),
            &Layout::new("/data", "/cache"),
            &ServicesConfig::default(),
            None,
        );
        let map = placeholder_map(&instance, &DatabaseConfig::default());
        assert_eq!(map["configFile"], "/data/services/caddy/Caddyfile");
    }
}
