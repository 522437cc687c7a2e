//! Activation computation.
//!
//! Pure string work behind the `lookup`/`activate` wire protocol: building
//! the new `PATH` value and the `eval`-able export script. Deactivation has
//! no counterpart here because the shell snippet performs it without
//! spawning a subprocess.

use std::path::Path;

pub const ENV_PROJECT: &str = "PANTRY_CURRENT_PROJECT";
pub const ENV_DIR: &str = "PANTRY_ENV_DIR";
pub const ENV_BIN_PATH: &str = "PANTRY_ENV_BIN_PATH";

/// Remove every occurrence of `bin` from a `PATH` value.
pub fn strip_path(current_path: &str, bin: &str) -> String {
    current_path
        .split(':')
        .filter(|segment| !segment.is_empty() && *segment != bin)
        .collect::<Vec<_>>()
        .join(":")
}

/// Prepend `env_bin` to `PATH`, guaranteeing it appears exactly once even
/// across repeated activations. `previous_bin` is the value of
/// `PANTRY_ENV_BIN_PATH` inherited from an earlier activation, stripped
/// before the new prefix goes on.
pub fn compute_path(current_path: &str, env_bin: &str, previous_bin: Option<&str>) -> String {
    let mut cleaned = strip_path(current_path, env_bin);
    if let Some(previous) = previous_bin {
        cleaned = strip_path(&cleaned, previous);
    }
    if cleaned.is_empty() {
        env_bin.to_string()
    } else {
        format!("{env_bin}:{cleaned}")
    }
}

/// The stdout payload of `activate`: shell commands that, when `eval`ed,
/// export the three identity variables and the rebuilt `PATH`.
pub fn activation_script(
    project_dir: &Path,
    env_dir: &Path,
    current_path: &str,
    previous_bin: Option<&str>,
) -> String {
    let env_bin = env_dir.join("bin");
    let env_bin_str = env_bin.to_string_lossy();
    let path = compute_path(current_path, &env_bin_str, previous_bin);

    let mut script = String::new();
    script.push_str(&format!(
        "export {ENV_PROJECT}={}\n",
        quote(&project_dir.to_string_lossy())
    ));
    script.push_str(&format!(
        "export {ENV_DIR}={}\n",
        quote(&env_dir.to_string_lossy())
    ));
    script.push_str(&format!("export {ENV_BIN_PATH}={}\n", quote(&env_bin_str)));
    script.push_str(&format!("export PATH={}\n", quote(&path)));
    script
}

/// The one-line stdout payload of `lookup`: `{env_dir}|{project_dir}`.
pub fn lookup_line(env_dir: &Path, project_dir: &Path) -> String {
    format!("{}|{}", env_dir.display(), project_dir.display())
}

fn quote(value: &str) -> String {
    shlex::try_quote(value)
        .map(|quoted| quoted.into_owned())
        .unwrap_or_else(|_| format!("'{}'", value.replace('\'', r"'\''")))
}
