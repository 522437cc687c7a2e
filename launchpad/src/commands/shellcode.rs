//! `launchpad shellcode` - emit the shell integration snippet.
//!
//! The emitted function is the other half of the wire protocol: it
//! short-circuits without any subprocess while the new directory is still
//! inside the activated project, deactivates entirely in shell (stripping
//! every occurrence of the env bin dir from `PATH`), and otherwise calls
//! `lookup`/`activate`.

use anyhow::Result;

pub const SNIPPET: &str = r#"# launchpad shell integration (bash/zsh)
__launchpad_hook() {
    [ "${LAUNCHPAD_SHELL_INTEGRATION:-1}" = "0" ] && return 0

    if [ -n "${PANTRY_CURRENT_PROJECT:-}" ]; then
        case "$PWD/" in
            "$PANTRY_CURRENT_PROJECT"/*)
                # still inside the active project: no subprocess
                return 0
                ;;
        esac
        # left the project: deactivate in-shell
        if [ -n "${PANTRY_ENV_BIN_PATH:-}" ]; then
            local __lp_path=":$PATH:"
            while [ "${__lp_path#*:$PANTRY_ENV_BIN_PATH:}" != "$__lp_path" ]; do
                __lp_path="${__lp_path%%:$PANTRY_ENV_BIN_PATH:*}:${__lp_path#*:$PANTRY_ENV_BIN_PATH:}"
            done
            __lp_path="${__lp_path#:}"
            PATH="${__lp_path%:}"
            export PATH
        fi
        unset PANTRY_CURRENT_PROJECT PANTRY_ENV_DIR PANTRY_ENV_BIN_PATH
    fi

    if launchpad lookup "$PWD" >/dev/null 2>&1; then
        eval "$(launchpad activate "$PWD" 2>/dev/null)"
    elif [ -n "$(__launchpad_manifest_nearby)" ]; then
        eval "$(launchpad activate "$PWD")"
    fi
    return 0
}

__launchpad_manifest_nearby() {
    local dir="$PWD"
    while [ -n "$dir" ]; do
        for name in deps.yaml deps.yml dependencies.yaml dependencies.yml package.json pantry.json; do
            if [ -f "$dir/$name" ]; then
                printf '%s\n' "$dir/$name"
                return 0
            fi
        done
        [ "$dir" = "/" ] && break
        dir="${dir%/*}"
        [ -n "$dir" ] || dir="/"
    done
    return 1
}

if [ -n "${ZSH_VERSION:-}" ]; then
    typeset -ag chpwd_functions
    if [[ -z "${chpwd_functions[(r)__launchpad_hook]:-}" ]]; then
        chpwd_functions+=(__launchpad_hook)
    fi
    __launchpad_hook
elif [ -n "${BASH_VERSION:-}" ]; then
    case ";${PROMPT_COMMAND:-};" in
        *";__launchpad_hook;"*) ;;
        *) PROMPT_COMMAND="__launchpad_hook${PROMPT_COMMAND:+;$PROMPT_COMMAND}" ;;
    esac
fi
"#;

pub fn run() -> Result<i32> {
    print!("{SNIPPET}");

    // Installation hint only; editing RC files is the user's call.
    let zshrc = match std::env::var("ZDOTDIR") {
        Ok(dir) if !dir.is_empty() => format!("{dir}/.zshrc"),
        _ => "~/.zshrc".to_string(),
    };
    eprintln!();
    eprintln!("# To install, add this line to {zshrc} (zsh) or ~/.bashrc (bash):");
    eprintln!("#   eval \"$(launchpad shellcode)\"");
    Ok(0)
}
