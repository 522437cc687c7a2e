//! `launchpad service` - service lifecycle commands.
//!
//! Services run against the current project context when a manifest is
//! found: unit labels, data directories, and log files are scoped by the
//! fingerprint-derived project hash so two projects can run the same
//! service side by side.

use crate::context::Context;
use crate::output::Output;
use crate::services::supervisor::{StartOptions, Supervisor};
use crate::services::{ServiceError, ServiceInstance};
use anyhow::Result;
use clap::{Args, Subcommand};
use launchpad_install::manifest::ServiceDecl;
use launchpad_install::{manifest, Fingerprint, Manifest};

#[derive(Debug, Args)]
pub struct ServiceArgs {
    #[command(subcommand)]
    pub action: ServiceAction,
}

#[derive(Debug, Subcommand)]
pub enum ServiceAction {
    /// Start declared services (or one by name) in dependency order
    Start {
        name: Option<String>,
        /// Keep starting remaining services after one fails
        #[arg(long = "continue-on-error")]
        continue_on_error: bool,
    },
    /// Stop services in reverse dependency order
    Stop { name: Option<String> },
    /// Restart a service
    Restart { name: String },
    /// Mark a service to start at login (rewrites the unit only)
    Enable { name: String },
    /// Unmark a service from starting at login
    Disable { name: String },
    /// Show service states
    Status { name: Option<String> },
    /// List declared and catalog services
    List,
}

struct ProjectServices {
    supervisor: Supervisor,
    instances: Vec<ServiceInstance>,
}

/// Bind the current project's declarations (or a single named service) to
/// instances. Outside a project, a bare name binds unscoped.
fn project_services(ctx: &Context, only: Option<&str>) -> Result<ProjectServices, ServiceError> {
    let cwd = std::env::current_dir().map_err(ServiceError::Io)?;
    let discovered = manifest::discover(&cwd);

    let (decls, project): (Vec<ServiceDecl>, Option<(String, String)>) = match &discovered {
        Some((manifest_path, project_dir)) => {
            let parsed = Manifest::load(manifest_path)
                .map_err(|err| ServiceError::Manager(err.to_string()))?;
            let hash = Fingerprint::compute(&parsed, ctx.platform)
                .project_hash()
                .to_string();
            let name = project_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string());
            (parsed.services, Some((hash, name)))
        }
        None => (Vec::new(), None),
    };

    let env_bin = discovered
        .as_ref()
        .and_then(|(_, project_dir)| ctx.env_cache().lookup(project_dir))
        .map(|(env_dir, _)| env_dir.join("bin"));

    let supervisor = Supervisor::new(ctx, env_bin);
    let project_ref = project
        .as_ref()
        .map(|(hash, name)| (hash.as_str(), name.as_str()));

    let mut instances = supervisor.instances(&decls, project_ref);

    if let Some(name) = only {
        if !instances.iter().any(|instance| instance.name() == name) {
            // Named service not declared by the manifest: bind it directly
            // from the catalog (unscoped when outside a project).
            crate::services::find_definition(name)?;
            let decl = ServiceDecl::bare(name);
            let mut extra = supervisor.instances(std::slice::from_ref(&decl), project_ref);
            instances.append(&mut extra);
        }
        instances.retain(|instance| instance.name() == name);
    }

    Ok(ProjectServices {
        supervisor,
        instances,
    })
}

pub async fn run(ctx: &Context, args: ServiceArgs) -> Result<i32> {
    match args.action {
        ServiceAction::Start {
            name,
            continue_on_error,
        } => {
            let mut project = project_services(ctx, name.as_deref())?;
            if project.instances.is_empty() {
                Output::warning("no services declared");
                return Ok(0);
            }
            if ctx.dry_run {
                for instance in &project.instances {
                    Output::dry_run(format!("Would start {}", instance.name()));
                }
                return Ok(0);
            }
            project
                .supervisor
                .start_all(
                    &mut project.instances,
                    &StartOptions { continue_on_error },
                )
                .await?;
            for instance in &project.instances {
                Output::success(format!("{} started", instance.name()));
            }
            Ok(0)
        }
        ServiceAction::Stop { name } => {
            let mut project = project_services(ctx, name.as_deref())?;
            if ctx.dry_run {
                for instance in &project.instances {
                    Output::dry_run(format!("Would stop {}", instance.name()));
                }
                return Ok(0);
            }
            project.supervisor.stop_all(&mut project.instances).await?;
            for instance in &project.instances {
                Output::success(format!("{} stopped", instance.name()));
            }
            Ok(0)
        }
        ServiceAction::Restart { name } => {
            let mut project = project_services(ctx, Some(&name))?;
            let Some(instance) = project.instances.first_mut() else {
                return Err(ServiceError::UnknownService(name).into());
            };
            project.supervisor.restart(instance).await?;
            Output::success(format!("{} restarted", instance.name()));
            Ok(0)
        }
        ServiceAction::Enable { name } => {
            let mut project = project_services(ctx, Some(&name))?;
            let Some(instance) = project.instances.first_mut() else {
                return Err(ServiceError::UnknownService(name).into());
            };
            project.supervisor.set_enabled(instance, true).await?;
            Output::success(format!("{} enabled", instance.name()));
            Ok(0)
        }
        ServiceAction::Disable { name } => {
            let mut project = project_services(ctx, Some(&name))?;
            let Some(instance) = project.instances.first_mut() else {
                return Err(ServiceError::UnknownService(name).into());
            };
            project.supervisor.set_enabled(instance, false).await?;
            Output::success(format!("{} disabled", instance.name()));
            Ok(0)
        }
        ServiceAction::Status { name } => {
            let project = project_services(ctx, name.as_deref())?;
            if project.instances.is_empty() {
                Output::info("no services declared");
                return Ok(0);
            }
            for instance in &project.instances {
                let state = project.supervisor.query_state(instance).await;
                let port = instance
                    .port()
                    .map(|p| format!(" :{p}"))
                    .unwrap_or_default();
                let pid = std::fs::read_to_string(&instance.pid_file)
                    .ok()
                    .and_then(|content| content.trim().parse::<u32>().ok())
                    .map(|pid| format!(" (pid {pid})"))
                    .unwrap_or_default();
                Output::kv(
                    instance.name(),
                    format!("{}{port}{pid}", state.as_str()),
                );
            }
            Ok(0)
        }
        ServiceAction::List => {
            let project = project_services(ctx, None)?;
            if !project.instances.is_empty() {
                Output::info("declared by this project:");
                for instance in &project.instances {
                    Output::step(instance.name().to_string());
                }
            }
            Output::info("available in the catalog:");
            for definition in crate::services::catalog() {
                Output::step(format!(
                    "{}  ({})",
                    definition.name, definition.package_domain
                ));
            }
            Ok(0)
        }
    }
}
