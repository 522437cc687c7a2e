//! `launchpad lookup <pwd>` - the read side of the shell wire protocol.
//!
//! Prints exactly one line `{env_dir}|{project_dir}` and exits 0 on a valid
//! cache hit; exits 1 with empty stdout otherwise. Every internal error is a
//! miss: the shell hook must never block a `cd` on our problems, so the real
//! reason only goes to stderr via tracing.

use crate::context::Context;
use anyhow::Result;
use launchpad_install::activation;
use std::path::PathBuf;
use tracing::debug;

pub async fn run(ctx: &Context, pwd: PathBuf) -> Result<i32> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        ctx.env_cache().lookup(&pwd)
    })) {
        Ok(Some((env_dir, project_dir))) => {
            println!("{}", activation::lookup_line(&env_dir, &project_dir));
            Ok(0)
        }
        Ok(None) => Ok(1),
        Err(_) => {
            debug!("lookup panicked; reporting cache miss");
            Ok(1)
        }
    }
}
