//! Configuration file support for Moon.
//!
//! This module defines the structure of the optional `moon.toml` file and
//! provides functionality to load and parse it. Every field is optional;
//! command-line flags take precedence.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::runner::CommandSpec;

/// Top-level configuration structure corresponding to `moon.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// File that receives every captured line, unfiltered.
    pub log_file: Option<String>,
    /// Patterns a line must match (any of) to be shown.
    #[serde(default)]
    pub include: Vec<String>,
    /// Patterns that hide a line.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Patterns whose matches are shown in inverse video.
    #[serde(default)]
    pub highlight: Vec<String>,
    /// Milliseconds between SIGTERM and SIGKILL when terminating.
    pub grace_ms: Option<u64>,
    /// Template for terminal lines.
    pub format: Option<String>,
    /// Template for log file lines.
    pub log_format: Option<String>,
    /// Leave children running on shutdown.
    pub leave_running: Option<bool>,
    /// Commands launched at startup, before stdin is read.
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandConfig>,
}

/// Configuration for a single command.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    /// Label shown next to the command's output.
    pub host: String,
    /// Executable and arguments, whitespace separated.
    pub cmd: String,
}

impl CommandConfig {
    pub fn to_spec(&self) -> CommandSpec {
        CommandSpec::new(self.host.trim(), self.cmd.trim())
    }
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_optional_fields() {
        let raw = r#"
log_file = "moon.log"
include = ["ERROR", "WARN"]
exclude = ["healthcheck"]
highlight = ["timeout"]
grace_ms = 2500
format = "%{host} %{message}"
log_format = "%{host}: %{message}"
leave_running = true

[[command]]
host = "web1"
cmd = "ssh web1 tail -f /var/log/nginx/error.log"

[[command]]
host = "db"
cmd = "ssh db journalctl -f"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.log_file.as_deref(), Some("moon.log"));
        assert_eq!(config.include, vec!["ERROR", "WARN"]);
        assert_eq!(config.exclude, vec!["healthcheck"]);
        assert_eq!(config.highlight, vec!["timeout"]);
        assert_eq!(config.grace_ms, Some(2500));
        assert_eq!(config.format.as_deref(), Some("%{host} %{message}"));
        assert_eq!(config.log_format.as_deref(), Some("%{host}: %{message}"));
        assert_eq!(config.leave_running, Some(true));
        assert_eq!(config.commands.len(), 2);
        assert_eq!(
            config.commands[1].to_spec(),
            CommandSpec::new("db", "ssh db journalctl -f")
        );
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.log_file.is_none());
        assert!(config.include.is_empty());
        assert!(config.commands.is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("colour = true").is_err());
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moon.toml");
        std::fs::write(&path, "grace_ms = \"soon\"").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to parse config file"));
    }
}
