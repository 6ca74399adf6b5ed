//! Command launching and lifecycle tracking.
//!
//! Each launched command gets one runner task. The runner starts the child in
//! its own process group, attaches a line reader to stdout and stderr, waits
//! for the child to exit, and brackets the whole run with exactly one
//! `Started` and one `Finished` event.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::{EventTx, OutputEvent, StreamKind};
use crate::reader::forward_lines;
use crate::supervisor::Registry;

/// How long a runner waits for its readers after the child exits.
///
/// Grandchildren that inherited the pipes can keep them open forever; past
/// this point the readers are left to finish on their own.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One command to launch, as read from intake or the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Free-form label shown next to every line of output.
    pub host: String,
    /// Executable and arguments, separated by whitespace.
    pub command: String,
}

impl CommandSpec {
    pub fn new(host: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            command: command.into(),
        }
    }

    /// Whitespace-split argument vector. No shell quoting is applied.
    pub fn argv(&self) -> Vec<&str> {
        self.command.split_whitespace().collect()
    }

    /// Printable form of the argument vector.
    pub fn display_command(&self) -> String {
        shell_words::join(self.argv())
    }
}

/// Handle to a live child process.
///
/// The runner owns the child itself; this handle only carries what the
/// terminator needs to signal the process group and observe the exit.
#[derive(Debug, Clone)]
pub struct RunningProcess {
    host: String,
    pid: u32,
    exited: watch::Receiver<bool>,
}

impl RunningProcess {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Resolves once the runner has reaped the child.
    pub async fn wait_exit(&self) {
        let mut exited = self.exited.clone();
        // An error means the runner is gone, and it only goes away after reaping.
        let _ = exited.wait_for(|done| *done).await;
    }
}

/// Runs one command to completion.
pub async fn run_command(id: u64, spec: CommandSpec, tx: EventTx, registry: Registry) {
    match launch(&spec) {
        Ok((child, pid)) => {
            let exit_tx = track(id, &spec, pid, &registry);
            tx.started(&spec.host).await;
            supervise(id, &spec, child, pid, exit_tx, &tx, &registry).await;
        }
        Err(err) => {
            let cause = format!("{:#}", err);
            warn!(host = %spec.host, error = %cause, "launch failed");
            tx.started(&spec.host).await;
            tx.error(OutputEvent::error(&spec.host, cause)).await;
        }
    }
    tx.finished(&spec.host).await;
}

/// Spawns the child and returns it with its pid.
fn launch(spec: &CommandSpec) -> Result<(Child, u32)> {
    let argv = spec.argv();
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command for {}", spec.host);
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    #[cfg(unix)]
    unsafe {
        command.pre_exec(|| {
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command
        .spawn()
        .with_context(|| format!("failed to start {}", program))?;
    let pid = child
        .id()
        .with_context(|| format!("{} exited before its pid was known", program))?;
    Ok((child, pid))
}

// Registers the child before `Started` goes out, so anyone reacting to
// the event can already find the handle.
fn track(id: u64, spec: &CommandSpec, pid: u32, registry: &Registry) -> watch::Sender<bool> {
    let (exit_tx, exit_rx) = watch::channel(false);
    registry.insert(
        id,
        RunningProcess {
            host: spec.host.clone(),
            pid,
            exited: exit_rx,
        },
    );
    debug!(host = %spec.host, pid, "process started");
    exit_tx
}

async fn supervise(
    id: u64,
    spec: &CommandSpec,
    mut child: Child,
    pid: u32,
    exit_tx: watch::Sender<bool>,
    tx: &EventTx,
    registry: &Registry,
) {
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(
            spec.host.clone(),
            StreamKind::Stdout,
            stdout,
            tx.clone(),
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(
            spec.host.clone(),
            StreamKind::Stderr,
            stderr,
            tx.clone(),
        )));
    }

    // Exit status is not surfaced to the view, only to diagnostics.
    match child.wait().await {
        Ok(status) => debug!(host = %spec.host, pid, %status, "process exited"),
        Err(err) => warn!(host = %spec.host, pid, error = %err, "failed to wait for process"),
    }
    let _ = exit_tx.send(true);
    registry.remove(id);

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        for reader in readers.iter_mut() {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        debug!(host = %spec.host, "output still open after exit, detaching readers");
    }
}
