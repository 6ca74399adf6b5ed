//! Moon: run many commands at once and watch their output in one pane.
//!
//! This is the entry point of the application. It parses command-line
//! arguments, loads the optional configuration file, and wires the intake,
//! the supervisor and the dispatcher together until a shutdown signal
//! arrives.

mod config;
mod dispatcher;
mod events;
mod filter;
mod format;
mod intake;
mod logging;
mod reader;
mod runner;
mod supervisor;
mod terminal;
mod terminator;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, IsTerminal, LineWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatcher::{DispatchConfig, Dispatcher};
use crate::filter::FilterSet;
use crate::format::{Palette, Template, DEFAULT_FORMAT, DEFAULT_LOG_FORMAT};
use crate::logging::LogLevel;
use crate::runner::CommandSpec;
use crate::supervisor::Supervisor;
use crate::terminal::TerminalGuard;

/// Command-line interface definition.
///
/// `-h` declares a highlight pattern, so help is only available as `--help`.
#[derive(Debug, Parser)]
#[command(
    name = "moon",
    version,
    about = "Run commands concurrently and multiplex their output by host",
    long_about = "Reads `host,command args...` lines from stdin, runs every command \
                  concurrently and shows all output in one live view.",
    styles = help_styles(),
    disable_help_flag = true
)]
struct Cli {
    /// Print help.
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
    /// Append every captured line, unfiltered, to this file.
    #[arg(short = 'f', value_name = "PATH")]
    file: Option<PathBuf>,
    /// Hide lines matching this pattern (repeatable).
    #[arg(short = 'v', value_name = "PATTERN")]
    exclude: Vec<String>,
    /// Highlight matches of this pattern (repeatable).
    #[arg(short = 'h', value_name = "PATTERN")]
    highlight: Vec<String>,
    /// Path to moon.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any moon.toml in the current directory.
    #[arg(long)]
    no_config: bool,
    /// Time between SIGTERM and SIGKILL when stopping a command (ms).
    #[arg(long)]
    grace_ms: Option<u64>,
    /// Leave commands running when moon exits.
    #[arg(long)]
    leave_running: bool,
    /// Template for terminal lines (e.g. "%{host} %{message}").
    #[arg(long)]
    format: Option<String>,
    /// Template for log file lines.
    #[arg(long)]
    log_format: Option<String>,
    /// Diagnostic log level (overrides MOON_LOG).
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
    /// Only show lines matching at least one of these patterns.
    #[arg(value_name = "PATTERN")]
    patterns: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level)?;
    let config = load_file_config(&cli)?;
    let settings = RunSettings::from_cli(&cli, config)?;
    let log = match settings.log_file.as_deref() {
        Some(path) => Some(open_log(path)?),
        None => None,
    };

    let guard = TerminalGuard::enter().context("failed to prepare terminal")?;
    let (tx, rx) = events::channel(events::QUEUE_CAPACITY);

    let dispatcher_stop = CancellationToken::new();
    let dispatcher = Dispatcher::new(settings.dispatch, io::stdout(), log);
    let mut dispatch = tokio::spawn(dispatcher.run(rx, dispatcher_stop.clone()));

    let supervisor = Arc::new(Supervisor::new(tx, settings.grace));
    for spec in settings.commands {
        supervisor.launch(spec);
    }

    let intake_stop = CancellationToken::new();
    let intake = if io::stdin().is_terminal() {
        info!("stdin is a terminal, not reading commands from it");
        None
    } else {
        let (line_tx, line_rx) = mpsc::channel(64);
        intake::spawn_reader(BufReader::new(io::stdin()), line_tx);
        Some(tokio::spawn(intake::run(
            line_rx,
            supervisor.clone(),
            intake_stop.clone(),
        )))
    };

    let mut dispatch_done = false;
    let mut result = tokio::select! {
        signal = wait_for_shutdown_signal() => {
            signal.context("failed to listen for shutdown signals")
        }
        joined = &mut dispatch => {
            dispatch_done = true;
            dispatcher_result(joined)
        }
    };

    info!(running = supervisor.registry().len(), "shutting down");
    intake_stop.cancel();
    if let Some(intake) = intake {
        join_intake(intake).await;
    }
    supervisor.shutdown(settings.leave_running).await;
    debug!(pending = supervisor.pending(), "supervisor stopped");

    dispatcher_stop.cancel();
    if !dispatch_done {
        let drained = dispatcher_result(dispatch.await);
        if result.is_ok() {
            result = drained;
        }
    }
    drop(guard);
    result
}

/// Completes on SIGINT or SIGTERM (Ctrl-C only on non-unix platforms).
async fn wait_for_shutdown_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            ctrl_c = tokio::signal::ctrl_c() => ctrl_c?,
            _ = sigterm.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

async fn join_intake(intake: JoinHandle<()>) {
    if let Err(err) = intake.await {
        warn!(error = %err, "command intake task failed");
    }
}

fn dispatcher_result(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.context("dispatcher task failed")?
}

fn load_file_config(cli: &Cli) -> Result<Config> {
    if cli.no_config {
        return Ok(Config::default());
    }
    let path = cli.config.clone().or_else(default_config_path);
    match path {
        Some(path) => config::load_config(&path),
        None => Ok(Config::default()),
    }
}

fn default_config_path() -> Option<PathBuf> {
    let path = Path::new("moon.toml");
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

fn open_log(path: &Path) -> Result<LineWriter<File>> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    Ok(LineWriter::new(file))
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
        .valid(Style::new().fg_color(Some(AnsiColor::Green.into())))
        .invalid(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        )
}

/// Runtime configuration derived from CLI arguments and the config file.
#[derive(Debug)]
struct RunSettings {
    dispatch: DispatchConfig,
    log_file: Option<PathBuf>,
    grace: Duration,
    leave_running: bool,
    commands: Vec<CommandSpec>,
}

impl RunSettings {
    fn from_cli(cli: &Cli, config: Config) -> Result<Self> {
        let include = merged(&config.include, &cli.patterns);
        let exclude = merged(&config.exclude, &cli.exclude);
        let highlight = merged(&config.highlight, &cli.highlight);
        let filters = FilterSet::new(&include, &exclude, &highlight)?;

        let palette = Palette::standard();
        let format = cli
            .format
            .clone()
            .or(config.format)
            .unwrap_or_else(|| DEFAULT_FORMAT.to_string());
        let log_format = cli
            .log_format
            .clone()
            .or(config.log_format)
            .unwrap_or_else(|| DEFAULT_LOG_FORMAT.to_string());

        let grace = cli
            .grace_ms
            .or(config.grace_ms)
            .map(Duration::from_millis)
            .unwrap_or(terminator::DEFAULT_GRACE);
        let leave_running = cli.leave_running || config.leave_running.unwrap_or(false);
        let log_file = cli.file.clone().or(config.log_file.map(PathBuf::from));
        let commands = config.commands.iter().map(|c| c.to_spec()).collect();

        Ok(Self {
            dispatch: DispatchConfig {
                filters,
                format: Template::parse(&format, &palette),
                log_format: Template::parse(&log_format, &palette),
            },
            log_file,
            grace,
            leave_running,
            commands,
        })
    }
}

fn merged(from_file: &[String], from_cli: &[String]) -> Vec<String> {
    from_file.iter().chain(from_cli).cloned().collect()
}
