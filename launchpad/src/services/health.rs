//! Health probes and helper-command execution.
//!
//! A health check is an argv run on a poll interval with a per-probe
//! timeout; the gate passes on the first zero exit and fails once the retry
//! budget is spent. A probe tool that is not installed at all surfaces as
//! `MissingDependency` with an install hint instead of burning the budget.

use super::{HealthCheck, ServiceError};
use crate::services::placeholders;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Run one argv to completion with a timeout, capturing output.
pub async fn run_command(
    argv: &[String],
    timeout: Duration,
) -> Result<std::process::Output, ServiceError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ServiceError::Manager("empty command".to_string()))?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ServiceError::MissingDependency {
                tool: program.clone(),
                hint: install_hint(program),
            });
        }
        Err(err) => return Err(err.into()),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ServiceError::Manager(format!(
            "command '{program}' timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Poll the health check until it passes or the retry budget is exhausted.
pub async fn wait_healthy(
    service: &str,
    check: &HealthCheck,
    map: &BTreeMap<String, String>,
) -> Result<(), ServiceError> {
    let argv = placeholders::expand_all(&check.command, map);
    let timeout = Duration::from_secs(check.timeout_secs);

    for attempt in 1..=check.retries {
        match run_command(&argv, timeout).await {
            Ok(output) if output.status.success() => {
                debug!(service, attempt, "health check passed");
                return Ok(());
            }
            Ok(_) => {
                debug!(service, attempt, "health check not ready");
            }
            Err(err @ ServiceError::MissingDependency { .. }) => return Err(err),
            Err(err) => {
                debug!(service, attempt, error = %err, "health probe errored");
            }
        }
        if attempt < check.retries {
            tokio::time::sleep(Duration::from_secs(check.interval_secs)).await;
        }
    }

    Err(ServiceError::HealthCheckFailed {
        service: service.to_string(),
        attempts: check.retries,
    })
}

fn install_hint(tool: &str) -> String {
    match tool {
        "pg_isready" | "initdb" | "createdb" | "psql" => {
            "install the PostgreSQL client tools".to_string()
        }
        "redis-cli" => "install the Redis client".to_string(),
        other => format!("install {other} and ensure it is on PATH"),
    }
}
