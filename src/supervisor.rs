//! Tracking of launched commands.
//!
//! Runner tasks are spawned through a [`TaskTracker`] so shutdown can wait for
//! them, and every live child is kept in a [`Registry`] so it can be
//! terminated by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::events::{EventTx, OutputEvent};
use crate::logging::LAUNCH_TARGET;
use crate::runner::{run_command, CommandSpec, RunningProcess};
use crate::terminator::{terminate, TerminateError, Termination};

/// Extra time past the grace period that shutdown waits for runners.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(3);

/// Live child processes by launch id.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<HashMap<u64, RunningProcess>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, RunningProcess>> {
        // Entries are plain handles, so a poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, id: u64, process: RunningProcess) {
        self.lock().insert(id, process);
    }

    pub fn remove(&self, id: u64) -> Option<RunningProcess> {
        self.lock().remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<RunningProcess> {
        self.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of every live process, lowest first.
    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Owns the runner tasks and the registry of their children.
pub struct Supervisor {
    tx: EventTx,
    registry: Registry,
    tracker: TaskTracker,
    next_id: AtomicU64,
    grace: Duration,
}

impl Supervisor {
    pub fn new(tx: EventTx, grace: Duration) -> Self {
        Self {
            tx,
            registry: Registry::default(),
            tracker: TaskTracker::new(),
            next_id: AtomicU64::new(1),
            grace,
        }
    }

    pub fn events(&self) -> &EventTx {
        &self.tx
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of runner tasks that have not finished yet.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Starts a runner for `spec` without waiting for it. Returns its id.
    pub fn launch(&self, spec: CommandSpec) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(
            target: LAUNCH_TARGET,
            id,
            "Starting ({}): {}",
            spec.host,
            spec.display_command()
        );
        self.tracker.spawn(run_command(
            id,
            spec,
            self.tx.clone(),
            self.registry.clone(),
        ));
        id
    }

    /// Terminates every live command concurrently, reporting each outcome
    /// as an output line tagged with its host.
    pub async fn terminate_all(&self) {
        if self.registry.is_empty() {
            return;
        }
        let mut stops = JoinSet::new();
        for id in self.registry.ids() {
            if let Some(process) = self.registry.get(id) {
                stops.spawn(stop(process, self.grace, self.tx.clone()));
            }
        }
        debug!(count = stops.len(), "terminating running commands");
        while stops.join_next().await.is_some() {}
    }

    /// Stops accepting work and, unless told to leave children running,
    /// terminates them and waits for their runners to finish.
    pub async fn shutdown(&self, leave_running: bool) {
        self.tracker.close();
        if leave_running {
            info!(running = self.registry.len(), "leaving commands running");
            return;
        }
        self.terminate_all().await;
        let budget = self.grace + SHUTDOWN_SLACK;
        if tokio::time::timeout(budget, self.tracker.wait()).await.is_err() {
            warn!(remaining = self.tracker.len(), "runners still busy after shutdown");
        }
    }
}

async fn stop(
    process: RunningProcess,
    grace: Duration,
    tx: EventTx,
) -> Result<Termination, TerminateError> {
    let result = terminate(&process, grace).await;
    let line = match &result {
        Ok(Termination::Stopped) => OutputEvent::new(process.host(), "stopped\n"),
        Ok(Termination::Killed) => OutputEvent::new(
            process.host(),
            format!("killed after {:?} grace period\n", grace),
        ),
        Err(err) => {
            warn!(host = %process.host(), kind = err.as_label(), error = %err, "termination failed");
            OutputEvent::error(process.host(), err)
        }
    };
    tx.error(line).await;
    result
}
