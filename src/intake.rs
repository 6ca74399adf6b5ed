//! Reading command lines and launching them.
//!
//! Each non-blank, non-comment line has the form `host,command arg...`.
//! Lines are read on a plain thread, like any other blocking input, and
//! handed to an async loop that launches one runner per valid line.

use std::io::BufRead;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::events::OutputEvent;
use crate::runner::CommandSpec;
use crate::supervisor::Supervisor;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IntakeError {
    #[error("malformed command line {0:?}: expected host,command")]
    MissingSeparator(String),

    #[error("no command given for host {0:?}")]
    EmptyCommand(String),
}

/// Parses one intake line.
///
/// Returns `Ok(None)` for blank lines and `#` comments. The line is split at
/// the first comma only, so commands may contain commas themselves.
pub fn parse_line(line: &str) -> Result<Option<CommandSpec>, IntakeError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let Some((host, command)) = line.split_once(',') else {
        return Err(IntakeError::MissingSeparator(line.to_string()));
    };
    let host = host.trim();
    let command = command.trim();
    if command.is_empty() {
        return Err(IntakeError::EmptyCommand(host.to_string()));
    }
    Ok(Some(CommandSpec::new(host, command)))
}

/// Feeds every line of `reader` into `tx` from a dedicated thread.
///
/// Bytes that are not UTF-8 are replaced, so a garbled line is rejected by
/// [`parse_line`] like any other malformed one. The thread ends at end of
/// input, on a read error, or once the receiver is gone. It is never joined,
/// so a blocked read cannot hold up exit.
pub fn spawn_reader<R>(mut reader: R, tx: mpsc::Sender<String>)
where
    R: BufRead + Send + 'static,
{
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to read command input");
                    break;
                }
            }
        }
        debug!("command input closed");
    });
}

/// Launches a runner for every valid line until input ends or `shutdown`
/// fires. Rejected lines are reported and skipped.
pub async fn run(
    mut lines: mpsc::Receiver<String>,
    supervisor: Arc<Supervisor>,
    shutdown: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = shutdown.cancelled() => break,
        };
        let Some(line) = line else { break };
        match parse_line(&line) {
            Ok(Some(spec)) => {
                supervisor.launch(spec);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "skipping command line");
                supervisor.events().error(OutputEvent::error("", &err)).await;
            }
        }
    }
}
