//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Filter priority:
//! 1. `--verbose` → debug for this crate, info for dependencies
//! 2. `LIVECAP_LOG` environment variable (any `EnvFilter` directive, e.g.
//!    "debug" or "livecap::probe=trace,info")
//! 3. default to `info`
//!
//! Logs go to STDERR; stdout carries command replies and reports.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

pub const LOG_ENV: &str = "LIVECAP_LOG";

/// Installs the global subscriber. Call once at startup.
pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = build_filter(std::env::var(LOG_ENV).ok().as_deref(), verbose);

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

fn build_filter(env: Option<&str>, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new(default_directives(true));
    }
    if let Some(directives) = env.map(str::trim).filter(|s| !s.is_empty())
        && let Ok(filter) = EnvFilter::try_new(directives)
    {
        return filter;
    }
    EnvFilter::new(default_directives(verbose))
}

fn default_directives(verbose: bool) -> &'static str {
    if verbose { "info,livecap=debug" } else { "info" }
}
