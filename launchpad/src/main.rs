//! launchpad - per-project package and environment manager.

use anyhow::Result;
use clap::Parser;
use launchpad::cli::{Cli, Commands};
use launchpad::commands;
use launchpad::config::Config;
use launchpad::context::Context;
use launchpad::output::Output;
use launchpad_install::InstallError;
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();

    let code = match dispatch().await {
        Ok(code) => code,
        Err(err) => {
            Output::error(format!("{err:#}"));
            match err.downcast_ref::<InstallError>() {
                Some(install_err) => install_err.exit_code(),
                None => 1,
            }
        }
    };
    std::process::exit(code);
}

async fn dispatch() -> Result<i32> {
    let cli = Cli::parse();
    let config = Config::load()?;
    let ctx = Context::new(config, cli.verbose, cli.dry_run)?;

    let cancel = ctx.cancel.clone();
    let _ = ctrlc::set_handler(move || {
        cancel.store(true, Ordering::Relaxed);
    });

    match cli.command {
        Commands::Install(args) => commands::install::run(&ctx, args).await,
        Commands::Lookup { pwd } => commands::lookup::run(&ctx, pwd).await,
        Commands::Activate { pwd } => commands::activate::run(&ctx, pwd).await,
        Commands::Shellcode => commands::shellcode::run(),
        Commands::Env(args) => commands::env::run(&ctx, args).await,
        Commands::Cache(args) => commands::cache::run(&ctx, args).await,
        Commands::Clean(args) => commands::clean::run(&ctx, args).await,
        Commands::Service(args) => commands::service::run(&ctx, args).await,
        Commands::Config(args) => commands::config_cmd::run(&ctx, args).await,
    }
}

/// Diagnostics go to stderr; stdout belongs to the wire protocol.
/// `LAUNCHPAD_DEBUG=1` forces debug level, otherwise `RUST_LOG` applies.
fn init_tracing() {
    let filter = if std::env::var("LAUNCHPAD_DEBUG").as_deref() == Ok("1") {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
