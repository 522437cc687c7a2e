//! `launchpad config` - typed configuration access.

use crate::config::{Config, KEY_PATHS};
use crate::context::Context;
use crate::output::Output;
use anyhow::Result;
use clap::{Args, Subcommand};

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print one configuration value as JSON
    Get { key: String },
    /// Set one configuration value (true/false/null/number/JSON auto-parse)
    Set { key: String, value: String },
    /// Print every known key and its effective value
    List,
}

pub async fn run(ctx: &Context, args: ConfigArgs) -> Result<i32> {
    match args.action {
        ConfigAction::Get { key } => {
            let value = ctx.config.get_by_path(&key)?;
            println!("{value}");
            Ok(0)
        }
        ConfigAction::Set { key, value } => {
            // Rewrite the file contents, not the env-merged view, so an env
            // override does not get baked into the config file.
            let mut on_disk = match std::fs::read_to_string(Config::config_file()) {
                Ok(content) => serde_json::from_str(&content)?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Config::default(),
                Err(err) => return Err(err.into()),
            };
            on_disk.set_by_path(&key, &value)?;
            if ctx.dry_run {
                Output::dry_run(format!("Would set {key} = {value}"));
                return Ok(0);
            }
            on_disk.save()?;
            Output::success(format!("{key} = {value}"));
            Ok(0)
        }
        ConfigAction::List => {
            for key in KEY_PATHS {
                let value = ctx
                    .config
                    .get_by_path(key)
                    .unwrap_or(serde_json::Value::Null);
                Output::kv(*key, value.to_string());
            }
            Ok(0)
        }
    }
}
