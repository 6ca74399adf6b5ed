//! Diagnostic logging via `tracing`.
//!
//! Priority for the log level:
//! 1. `--log-level` flag
//! 2. `MOON_LOG` environment variable
//! 3. `warn`, plus `info` for the launch announcements
//!
//! Diagnostics go to stderr. Stdout carries the multiplexed view only.

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Target of the `Starting (host): command` line emitted on every launch.
pub const LAUNCH_TARGET: &str = "moon::launch";

/// Filter used when neither the flag nor `MOON_LOG` is set.
pub fn default_filter() -> EnvFilter {
    EnvFilter::new(format!("warn,{}=info", LAUNCH_TARGET))
}

/// Installs the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(Level::from(level).as_str()),
        None => EnvFilter::try_from_env("MOON_LOG").unwrap_or_else(|_| default_filter()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {}", err))
}
