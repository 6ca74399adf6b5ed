//! Event definitions shared by every producer and the dispatcher.
//!
//! Runners and line readers never touch the terminal. They push events onto
//! one of three bounded queues (lifecycle, output, error) and the dispatcher
//! is the single consumer of all of them.

use tokio::sync::mpsc;

/// Capacity of each event queue. A full queue back-pressures the producer.
pub const QUEUE_CAPACITY: usize = 256;

/// Indicates the source stream of a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
}

/// One captured line, or a synthetic error line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    /// Host label of the command. Empty for errors not tied to a command.
    pub host: String,
    /// The line, including its trailing `\n` when the source had one.
    pub line: String,
}

impl OutputEvent {
    pub fn new(host: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            line: line.into(),
        }
    }

    /// A synthetic error line in the `Error occurred: <cause>` form.
    pub fn error(host: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::new(host, format!("Error occurred: {}\n", cause))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Started,
    Finished,
}

impl Lifecycle {
    pub fn label(&self) -> &'static str {
        match self {
            Lifecycle::Started => "started",
            Lifecycle::Finished => "finished",
        }
    }
}

/// Emitted exactly once with `Started` and once with `Finished` per command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub host: String,
    pub kind: Lifecycle,
}

/// Sending half of the event queues. Cheap to clone, one per producer.
#[derive(Debug, Clone)]
pub struct EventTx {
    lifecycle: mpsc::Sender<LifecycleEvent>,
    output: mpsc::Sender<OutputEvent>,
    error: mpsc::Sender<OutputEvent>,
}

/// Receiving half of the event queues, owned by the dispatcher.
#[derive(Debug)]
pub struct EventRx {
    pub lifecycle: mpsc::Receiver<LifecycleEvent>,
    pub output: mpsc::Receiver<OutputEvent>,
    pub error: mpsc::Receiver<OutputEvent>,
}

/// Creates the three event queues.
pub fn channel(capacity: usize) -> (EventTx, EventRx) {
    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(capacity);
    let (output_tx, output_rx) = mpsc::channel(capacity);
    let (error_tx, error_rx) = mpsc::channel(capacity);
    (
        EventTx {
            lifecycle: lifecycle_tx,
            output: output_tx,
            error: error_tx,
        },
        EventRx {
            lifecycle: lifecycle_rx,
            output: output_rx,
            error: error_rx,
        },
    )
}

// Sends fail only once the dispatcher is gone, at which point nobody is
// left to show the event, so the results are ignored.
impl EventTx {
    pub async fn started(&self, host: &str) {
        let _ = self
            .lifecycle
            .send(LifecycleEvent {
                host: host.to_string(),
                kind: Lifecycle::Started,
            })
            .await;
    }

    pub async fn finished(&self, host: &str) {
        let _ = self
            .lifecycle
            .send(LifecycleEvent {
                host: host.to_string(),
                kind: Lifecycle::Finished,
            })
            .await;
    }

    /// Routes a captured line to the output or error queue by stream.
    pub async fn line(&self, stream: StreamKind, event: OutputEvent) {
        let queue = match stream {
            StreamKind::Stdout => &self.output,
            StreamKind::Stderr => &self.error,
        };
        let _ = queue.send(event).await;
    }

    pub async fn error(&self, event: OutputEvent) {
        let _ = self.error.send(event).await;
    }
}

impl EventRx {
    /// Drains whatever is queued right now without waiting.
    #[cfg(test)]
    pub fn drain(&mut self) -> (Vec<LifecycleEvent>, Vec<OutputEvent>, Vec<OutputEvent>) {
        let mut lifecycle = Vec::new();
        let mut output = Vec::new();
        let mut error = Vec::new();
        while let Ok(event) = self.lifecycle.try_recv() {
            lifecycle.push(event);
        }
        while let Ok(event) = self.output.try_recv() {
            output.push(event);
        }
        while let Ok(event) = self.error.try_recv() {
            error.push(event);
        }
        (lifecycle, output, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_streams_to_separate_queues() {
        let (tx, mut rx) = channel(8);
        tx.line(StreamKind::Stdout, OutputEvent::new("a", "out\n")).await;
        tx.line(StreamKind::Stderr, OutputEvent::new("a", "err\n")).await;
        let (_, output, error) = rx.drain();
        assert_eq!(output, vec![OutputEvent::new("a", "out\n")]);
        assert_eq!(error, vec![OutputEvent::new("a", "err\n")]);
    }

    #[tokio::test]
    async fn lifecycle_queue_keeps_order() {
        let (tx, mut rx) = channel(8);
        tx.started("web").await;
        tx.finished("web").await;
        let (lifecycle, _, _) = rx.drain();
        let kinds: Vec<_> = lifecycle.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![Lifecycle::Started, Lifecycle::Finished]);
    }

    #[test]
    fn error_line_format() {
        let event = OutputEvent::error("db", "no such file");
        assert_eq!(event.line, "Error occurred: no such file\n");
        assert_eq!(event.host, "db");
    }
}
