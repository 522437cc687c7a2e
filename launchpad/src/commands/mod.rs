pub mod activate;
pub mod cache;
pub mod clean;
pub mod config_cmd;
pub mod env;
pub mod install;
pub mod lookup;
pub mod service;
pub mod shellcode;

/// Default registry endpoint; override with `LAUNCHPAD_REGISTRY_URL` for
/// mirrors and tests.
pub fn registry_url() -> String {
    std::env::var("LAUNCHPAD_REGISTRY_URL")
        .unwrap_or_else(|_| "https://registry.launchpad.sh".to_string())
}
