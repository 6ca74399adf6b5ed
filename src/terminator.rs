//! Graceful-then-forced termination of a process group.
//!
//! One polite `SIGTERM` to the whole group, a bounded wait for the runner to
//! reap the leader, then one `SIGKILL` if the wait ran out. Nothing is
//! retried beyond that.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::runner::RunningProcess;

/// Grace period used when none is configured.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// How a termination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited within the grace period.
    Stopped,
    /// The grace period ran out and the group was sent `SIGKILL`.
    Killed,
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TerminateError {
    /// The OS could not report the process group, usually because the
    /// process has already been reaped.
    #[error("cannot resolve process group of pid {pid}: {source}")]
    GroupLookup {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send {signal} to process group {pgid}: {source}")]
    Signal {
        signal: &'static str,
        pgid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("process group termination is not supported on this platform")]
    Unsupported,
}

impl TerminateError {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TerminateError::GroupLookup { .. } => "group_lookup",
            TerminateError::Signal { .. } => "signal",
            TerminateError::Unsupported => "unsupported",
        }
    }
}

/// Stops `process` and every member of its process group.
#[cfg(unix)]
pub async fn terminate(
    process: &RunningProcess,
    grace: Duration,
) -> Result<Termination, TerminateError> {
    if process.has_exited() {
        return Ok(Termination::Stopped);
    }
    let pgid = process_group(process.pid())?;
    signal_group(pgid, Signal::Term)?;

    match tokio::time::timeout(grace, process.wait_exit()).await {
        Ok(()) => Ok(Termination::Stopped),
        Err(_) => {
            warn!(
                host = %process.host(),
                pid = process.pid(),
                ?grace,
                "killing unresponsive process, it was asked nicely once before"
            );
            signal_group(pgid, Signal::Kill)?;
            Ok(Termination::Killed)
        }
    }
}

#[cfg(not(unix))]
pub async fn terminate(
    _process: &RunningProcess,
    _grace: Duration,
) -> Result<Termination, TerminateError> {
    Err(TerminateError::Unsupported)
}

#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
impl Signal {
    fn label(&self) -> &'static str {
        match self {
            Signal::Term => "SIGTERM",
            Signal::Kill => "SIGKILL",
        }
    }

    fn raw(&self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

#[cfg(unix)]
fn process_group(pid: u32) -> Result<i32, TerminateError> {
    // getpgid(0) would name our own group, and signalling it would stop moon.
    if pid == 0 {
        return Err(TerminateError::GroupLookup {
            pid,
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        });
    }
    let pgid = unsafe { libc::getpgid(pid as libc::pid_t) };
    if pgid < 0 {
        return Err(TerminateError::GroupLookup {
            pid,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(pgid)
}

#[cfg(unix)]
fn signal_group(pgid: i32, signal: Signal) -> Result<(), TerminateError> {
    // A negative pid addresses the whole group, not just the leader.
    let rc = unsafe { libc::kill(-pgid, signal.raw()) };
    if rc != 0 {
        return Err(TerminateError::Signal {
            signal: signal.label(),
            pgid,
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}
