//! Output helpers for consistent CLI output.
//!
//! Everything goes to stderr: stdout is reserved for the `lookup`/`activate`
//! wire contract, so progress and status must never leak into it.

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

pub struct Output;

impl Output {
    /// `✓ Installed 3 packages`
    pub fn success(msg: impl AsRef<str>) {
        eprintln!("{} {}", "✓".green().bold(), msg.as_ref());
    }

    /// `✗ Failed to install package`
    pub fn error(msg: impl AsRef<str>) {
        eprintln!("{} {}", "✗".red().bold(), msg.as_ref().red());
    }

    /// `⚠ Service already running`
    pub fn warning(msg: impl AsRef<str>) {
        eprintln!("{} {}", "⚠".yellow(), msg.as_ref());
    }

    /// `→ Resolving dependencies...`
    pub fn info(msg: impl AsRef<str>) {
        eprintln!("{} {}", "→".cyan(), msg.as_ref().dimmed());
    }

    /// `  • postgres`
    pub fn step(msg: impl AsRef<str>) {
        eprintln!("  {} {}", "•".cyan(), msg.as_ref());
    }

    /// `  Fingerprint:   ab12cd34`
    pub fn kv(key: impl AsRef<str>, value: impl AsRef<str>) {
        eprintln!(
            "  {:<16} {}",
            format!("{}:", key.as_ref()).cyan(),
            value.as_ref()
        );
    }

    /// `[dry-run] Would remove: ...`
    pub fn dry_run(msg: impl AsRef<str>) {
        eprintln!("{} {}", "[dry-run]".dimmed(), msg.as_ref().dimmed());
    }

    /// Animated on a terminal; hidden on CI so logs stay line-oriented.
    pub fn spinner(msg: impl Into<String>) -> ProgressBar {
        if std::env::var("CI").is_ok() || std::env::var("GITHUB_ACTIONS").is_ok() {
            let hidden = ProgressBar::hidden();
            hidden.set_message(msg.into());
            return hidden;
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(msg.into());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }
}
