//! Service lifecycle.
//!
//! Binds declarations to instances, orders them by dependency, generates
//! unit descriptors, and drives the OS service manager (`systemctl --user`
//! on Linux, `launchctl` on macOS). Unit files are rewritten atomically;
//! start order is topological and stop order is its reverse.

use super::{
    catalog, health, launchd, placeholders, systemd, ServiceDefinition, ServiceError,
    ServiceInstance, ServiceState,
};
use crate::config::{DatabaseConfig, ServicesConfig};
use crate::context::Context;
use crate::output::Output;
use launchpad_install::manifest::ServiceDecl;
use launchpad_install::platform::find_on_path;
use launchpad_install::{Layout, Os};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const POST_START_RETRIES: u32 = 3;
const POST_START_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Keep starting remaining services after one fails.
    pub continue_on_error: bool,
}

pub struct Supervisor {
    layout: Layout,
    os: Os,
    services_config: ServicesConfig,
    database: DatabaseConfig,
    username: String,
    /// `PATH` value searched for service executables; the active env's bin
    /// directory is prepended when a project context is known.
    search_path: String,
}

impl Supervisor {
    pub fn new(ctx: &Context, env_bin: Option<PathBuf>) -> Self {
        let mut search_path = std::env::var("PATH").unwrap_or_default();
        if let Some(bin) = env_bin {
            search_path = format!("{}:{search_path}", bin.to_string_lossy());
        }
        Self {
            layout: ctx.layout.clone(),
            os: ctx.platform.os,
            services_config: ctx.config.services.clone(),
            database: ctx.config.services.database.clone(),
            username: std::env::var("USER").unwrap_or_else(|_| "launchpad".to_string()),
            search_path,
        }
    }

    /// Bind declarations to instances. Catalog services keep their curated
    /// definition; other names become plain executables from the active
    /// environment. `dependsOn` from the declaration merges into the
    /// definition's dependency list.
    pub fn instances(
        &self,
        decls: &[ServiceDecl],
        project: Option<(&str, &str)>,
    ) -> Vec<ServiceInstance> {
        decls
            .iter()
            .map(|decl| {
                let mut definition = catalog()
                    .into_iter()
                    .find(|definition| definition.name == decl.name)
                    .unwrap_or_else(|| ServiceDefinition {
                        name: decl.name.clone(),
                        display_name: decl.name.clone(),
                        executable: decl.name.clone(),
                        ..Default::default()
                    });
                for dep in &decl.depends_on {
                    if !definition.dependencies.contains(dep) {
                        definition.dependencies.push(dep.clone());
                    }
                }
                ServiceInstance::new(
                    definition,
                    decl,
                    &self.layout,
                    &self.services_config,
                    project,
                )
            })
            .collect()
    }

    /// Topological start order over the declared set. Dependencies that name
    /// no declared service (package domains) do not order anything. A cycle
    /// reports the offending chain.
    pub fn start_order(instances: &[ServiceInstance]) -> Result<Vec<usize>, ServiceError> {
        let index_of: BTreeMap<&str, usize> = instances
            .iter()
            .enumerate()
            .map(|(index, instance)| (instance.name(), index))
            .collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }
        let mut marks = vec![Mark::White; instances.len()];
        let mut order = Vec::with_capacity(instances.len());

        fn visit(
            index: usize,
            instances: &[ServiceInstance],
            index_of: &BTreeMap<&str, usize>,
            marks: &mut [Mark],
            order: &mut Vec<usize>,
            chain: &mut Vec<String>,
        ) -> Result<(), ServiceError> {
            match marks[index] {
                Mark::Black => return Ok(()),
                Mark::Gray => {
                    let mut cycle = chain.clone();
                    cycle.push(instances[index].name().to_string());
                    return Err(ServiceError::CyclicDependency { chain: cycle });
                }
                Mark::White => {}
            }
            marks[index] = Mark::Gray;
            chain.push(instances[index].name().to_string());
            for dep in &instances[index].definition.dependencies {
                if let Some(&dep_index) = index_of.get(dep.as_str()) {
                    visit(dep_index, instances, index_of, marks, order, chain)?;
                }
            }
            chain.pop();
            marks[index] = Mark::Black;
            order.push(index);
            Ok(())
        }

        let mut chain = Vec::new();
        for index in 0..instances.len() {
            visit(
                index,
                instances,
                &index_of,
                &mut marks,
                &mut order,
                &mut chain,
            )?;
        }
        Ok(order)
    }

    /// Start every instance in dependency order. `AlreadyRunning` counts as
    /// satisfied; any other failure aborts the remaining starts unless
    /// `continue_on_error` is set.
    pub async fn start_all(
        &self,
        instances: &mut [ServiceInstance],
        options: &StartOptions,
    ) -> Result<(), ServiceError> {
        let order = Self::start_order(instances)?;
        for index in order {
            match self.start_one(&mut instances[index]).await {
                Ok(()) => {}
                Err(ServiceError::AlreadyRunning(name)) => {
                    Output::warning(format!("{name} is already running"));
                }
                Err(err) if options.continue_on_error => {
                    Output::error(format!("{}: {err}", instances[index].name()));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Stop every instance in reverse dependency order.
    pub async fn stop_all(&self, instances: &mut [ServiceInstance]) -> Result<(), ServiceError> {
        let mut order = Self::start_order(instances)?;
        order.reverse();
        for index in order {
            match self.stop_one(&mut instances[index]).await {
                Ok(()) | Err(ServiceError::NotRunning(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub async fn start_one(&self, instance: &mut ServiceInstance) -> Result<(), ServiceError> {
        if self.query_state(instance).await == ServiceState::Running {
            return Err(ServiceError::AlreadyRunning(instance.name().to_string()));
        }
        instance.state = ServiceState::Starting;

        fs::create_dir_all(&instance.data_dir)?;
        if let Some(parent) = instance.log_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let map = placeholders::placeholder_map(instance, &self.database);

        if let Some(init) = &instance.definition.init_command {
            if dir_is_empty(&instance.data_dir) {
                let argv = placeholders::expand_all(init, &map);
                debug!(service = instance.name(), "running init command");
                let output = health::run_command(
                    &argv,
                    Duration::from_secs(self.services_config.startup_timeout),
                )
                .await?;
                if !output.status.success() {
                    return Err(ServiceError::Manager(format!(
                        "init command for {} failed: {}",
                        instance.name(),
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
            }
        }

        self.write_unit(instance)?;
        self.load_and_start(instance).await?;

        if let Some(check) = instance.definition.health_check.clone() {
            if let Err(err) = health::wait_healthy(instance.name(), &check, &map).await {
                instance.state = ServiceState::Failed;
                return Err(err);
            }
        }

        for command in &instance.definition.post_start_commands {
            let argv = placeholders::expand_all(command, &map);
            self.run_post_start(instance.name(), &argv).await;
        }

        instance.state = ServiceState::Running;
        instance.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    pub async fn stop_one(&self, instance: &mut ServiceInstance) -> Result<(), ServiceError> {
        if self.query_state(instance).await != ServiceState::Running {
            return Err(ServiceError::NotRunning(instance.name().to_string()));
        }
        instance.state = ServiceState::Stopping;

        match self.os {
            Os::Linux => {
                self.systemctl(&["stop", &instance.unit_file_name(Os::Linux)])
                    .await?;
            }
            Os::MacOs => {
                let label = instance.unit_label(Os::MacOs);
                if instance.definition.supports_graceful_shutdown {
                    // launchctl stop delivers SIGTERM; unload force-stops
                    // whatever remains after the grace period.
                    let _ = self.launchctl(&["stop", &label]).await;
                    tokio::time::sleep(Duration::from_secs(
                        self.services_config.shutdown_timeout.min(5),
                    ))
                    .await;
                }
                let plist = instance.unit_path(Os::MacOs);
                self.launchctl(&["unload", &plist.to_string_lossy()])
                    .await?;
            }
        }

        instance.state = ServiceState::Stopped;
        instance.pid = None;
        Ok(())
    }

    pub async fn restart(&self, instance: &mut ServiceInstance) -> Result<(), ServiceError> {
        match self.stop_one(instance).await {
            Ok(()) | Err(ServiceError::NotRunning(_)) => {}
            Err(err) => return Err(err),
        }
        self.start_one(instance).await
    }

    /// Toggle only the boot-time wiring (`RunAtLoad` / `WantedBy`) by
    /// rewriting the unit; never starts or stops anything.
    pub async fn set_enabled(
        &self,
        instance: &mut ServiceInstance,
        enabled: bool,
    ) -> Result<(), ServiceError> {
        instance.enabled = enabled;
        self.write_unit(instance)?;
        if self.os == Os::Linux {
            self.systemctl(&["daemon-reload"]).await?;
        }
        Ok(())
    }

    /// Query the OS service manager and cross-reference the pid file.
    pub async fn query_state(&self, instance: &ServiceInstance) -> ServiceState {
        let state = match self.os {
            Os::Linux => {
                let unit = instance.unit_file_name(Os::Linux);
                match self.systemctl_unchecked(&["is-active", &unit]).await {
                    Some(output) => match output.trim() {
                        "active" => ServiceState::Running,
                        "activating" => ServiceState::Starting,
                        "deactivating" => ServiceState::Stopping,
                        "failed" => ServiceState::Failed,
                        "inactive" => ServiceState::Stopped,
                        _ => ServiceState::Unknown,
                    },
                    None => ServiceState::Unknown,
                }
            }
            Os::MacOs => {
                let label = instance.unit_label(Os::MacOs);
                match self.launchctl_unchecked(&["list", &label]).await {
                    Some(_) => ServiceState::Running,
                    None => ServiceState::Stopped,
                }
            }
        };

        if state == ServiceState::Running && !pid_file_alive(&instance.pid_file) {
            // Manager thinks it runs but the recorded pid is gone; report
            // what we can actually verify.
            if instance.pid_file.exists() {
                return ServiceState::Unknown;
            }
        }
        state
    }

    pub fn unit_path(&self, instance: &ServiceInstance) -> PathBuf {
        instance.unit_path(self.os)
    }

    /// Generate and atomically (re)write the unit descriptor.
    pub fn write_unit(&self, instance: &ServiceInstance) -> Result<(), ServiceError> {
        let contents = self.render_unit(instance)?;
        let path = instance.unit_path(self.os);
        launchpad_common::fsx::write_atomic(&path, contents.as_bytes())
            .map_err(|err| ServiceError::Manager(err.to_string()))?;
        Ok(())
    }

    /// Render the descriptor for the current platform without writing it.
    pub fn render_unit(&self, instance: &ServiceInstance) -> Result<String, ServiceError> {
        let map = placeholders::placeholder_map(instance, &self.database);
        let args = placeholders::expand_all(&instance.definition.args, &map);
        let mut env: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in &instance.definition.env {
            env.insert(key.clone(), placeholders::expand(value, &map));
        }

        let executable = self.resolve_executable(instance)?;
        let rendered = match self.os {
            Os::MacOs => {
                launchd::generate_plist(instance, &executable, &args, &env, &self.username)
            }
            Os::Linux => systemd::generate_unit(
                instance,
                &executable,
                &args,
                &env,
                &self.username,
                &self.services_config,
                None,
            ),
        };
        Ok(rendered)
    }

    fn resolve_executable(&self, instance: &ServiceInstance) -> Result<PathBuf, ServiceError> {
        find_on_path(&instance.definition.executable, &self.search_path).ok_or_else(|| {
            ServiceError::MissingDependency {
                tool: instance.definition.executable.clone(),
                hint: if instance.definition.package_domain.is_empty() {
                    format!(
                        "add {} to the project dependencies",
                        instance.definition.executable
                    )
                } else {
                    format!("install {}", instance.definition.package_domain)
                },
            }
        })
    }

    async fn load_and_start(&self, instance: &ServiceInstance) -> Result<(), ServiceError> {
        match self.os {
            Os::Linux => {
                self.systemctl(&["daemon-reload"]).await?;
                self.systemctl(&["start", &instance.unit_file_name(Os::Linux)])
                    .await?;
            }
            Os::MacOs => {
                let plist = instance.unit_path(Os::MacOs);
                let plist = plist.to_string_lossy();
                // A stale registration would make load a no-op.
                let _ = self.launchctl_unchecked(&["unload", &plist]).await;
                self.launchctl(&["load", "-w", &plist]).await?;
                self.launchctl(&["start", &instance.unit_label(Os::MacOs)])
                    .await?;
            }
        }
        Ok(())
    }

    async fn run_post_start(&self, service: &str, argv: &[String]) {
        for attempt in 1..=POST_START_RETRIES {
            match health::run_command(argv, Duration::from_secs(30)).await {
                Ok(output) if output.status.success() => return,
                Ok(output) => {
                    debug!(
                        service,
                        attempt,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "post-start command failed"
                    );
                }
                Err(err) => {
                    debug!(service, attempt, error = %err, "post-start command errored");
                }
            }
            if attempt < POST_START_RETRIES {
                tokio::time::sleep(POST_START_DELAY).await;
            }
        }
        warn!(service, command = %argv.join(" "), "post-start command gave up");
    }

    /// Stop a systemd unit by file name; used by cleanup over unit files
    /// that no longer have an in-memory instance.
    pub async fn manager_stop_unit(&self, unit_file: &str) -> Result<(), ServiceError> {
        let _ = self.systemctl_unchecked(&["stop", unit_file]).await;
        Ok(())
    }

    /// Unload a launchd plist by path; used by cleanup.
    pub async fn manager_unload_plist(
        &self,
        plist: &std::path::Path,
    ) -> Result<(), ServiceError> {
        let _ = self
            .launchctl_unchecked(&["unload", &plist.to_string_lossy()])
            .await;
        Ok(())
    }

    async fn systemctl(&self, args: &[&str]) -> Result<String, ServiceError> {
        let mut argv = vec!["systemctl".to_string(), "--user".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let output = health::run_command(&argv, Duration::from_secs(30)).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(ServiceError::Manager(format!(
                "systemctl --user {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn systemctl_unchecked(&self, args: &[&str]) -> Option<String> {
        let mut argv = vec!["systemctl".to_string(), "--user".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let output = health::run_command(&argv, Duration::from_secs(10)).await.ok()?;
        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            None
        }
    }

    async fn launchctl(&self, args: &[&str]) -> Result<String, ServiceError> {
        let mut argv = vec!["launchctl".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let output = health::run_command(&argv, Duration::from_secs(30)).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(ServiceError::Manager(format!(
                "launchctl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn launchctl_unchecked(&self, args: &[&str]) -> Option<String> {
        let mut argv = vec!["launchctl".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let output = health::run_command(&argv, Duration::from_secs(10)).await.ok()?;
        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            None
        }
    }
}

fn dir_is_empty(path: &std::path::Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

fn pid_file_alive(pid_file: &std::path::Path) -> bool {
    let Ok(content) = fs::read_to_string(pid_file) else {
        return false;
    };
    let Ok(pid) = content.trim().parse::<u32>() else {
        return false;
    };
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        true
    }
}
