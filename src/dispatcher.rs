//! The single consumer of every event.
//!
//! The dispatcher owns the terminal and the log file. It keeps the count of
//! running commands, filters and highlights output lines, and redraws the
//! banner after every event.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::events::{EventRx, Lifecycle, LifecycleEvent, OutputEvent};
use crate::filter::FilterSet;
use crate::format::{Fields, Template};
use crate::terminal;

/// Everything the dispatcher needs besides its writers. Built once.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub filters: FilterSet,
    pub format: Template,
    pub log_format: Template,
}

pub struct Dispatcher<T: Write, L: Write> {
    config: DispatchConfig,
    terminal: T,
    log: Option<L>,
    active: usize,
}

impl<T: Write, L: Write> Dispatcher<T, L> {
    pub fn new(config: DispatchConfig, terminal: T, log: Option<L>) -> Self {
        Self {
            config,
            terminal,
            log,
            active: 0,
        }
    }

    /// Number of commands started and not yet finished.
    pub fn active(&self) -> usize {
        self.active
    }

    #[cfg(test)]
    pub fn into_parts(self) -> (T, Option<L>) {
        (self.terminal, self.log)
    }

    /// Consumes events until `shutdown` fires, then drains what is queued.
    pub async fn run(mut self, mut rx: EventRx, shutdown: CancellationToken) -> Result<()> {
        self.banner(Local::now())?;
        loop {
            tokio::select! {
                Some(event) = rx.lifecycle.recv() => self.on_lifecycle(&event, Local::now())?,
                Some(event) = rx.output.recv() => self.on_output(&event, Local::now())?,
                Some(event) = rx.error.recv() => self.on_output(&event, Local::now())?,
                _ = shutdown.cancelled() => break,
            }
        }

        let drained = self.drain(&mut rx)?;
        debug!(drained, active = self.active(), "dispatcher stopping");
        self.finish()
    }

    /// Handles whatever is still queued. Lines go first so a command's last
    /// output is shown before its `finished` status.
    fn drain(&mut self, rx: &mut EventRx) -> Result<usize> {
        let mut drained = 0usize;
        while let Ok(event) = rx.output.try_recv() {
            self.on_output(&event, Local::now())?;
            drained += 1;
        }
        while let Ok(event) = rx.error.try_recv() {
            self.on_output(&event, Local::now())?;
            drained += 1;
        }
        while let Ok(event) = rx.lifecycle.try_recv() {
            self.on_lifecycle(&event, Local::now())?;
            drained += 1;
        }
        Ok(drained)
    }

    /// Updates the counter and prints `<host> started|finished`.
    pub fn on_lifecycle(&mut self, event: &LifecycleEvent, now: DateTime<Local>) -> Result<()> {
        match event.kind {
            Lifecycle::Started => self.active += 1,
            Lifecycle::Finished => match self.active.checked_sub(1) {
                Some(active) => self.active = active,
                None => warn!(host = %event.host, "finished event without a running command"),
            },
        }
        terminal::clear_line(&mut self.terminal)?;
        let status = format!("{}\n", event.kind.label());
        self.print(&event.host, &status, now)?;
        self.banner(now)
    }

    /// Shows the line if it survives the filters; always logs the original.
    pub fn on_output(&mut self, event: &OutputEvent, now: DateTime<Local>) -> Result<()> {
        terminal::clear_line(&mut self.terminal)?;
        if let Some(shown) = self.config.filters.apply(&event.line) {
            let shown = shown.into_owned();
            self.print(&event.host, &shown, now)?;
        }
        self.write_log(event, now);
        self.banner(now)
    }

    fn print(&mut self, host: &str, message: &str, now: DateTime<Local>) -> Result<()> {
        let line = self.config.format.render(&Fields {
            time: now,
            host,
            message,
        });
        self.terminal
            .write_all(terminated(line).as_bytes())
            .context("failed to write to terminal")
    }

    fn write_log(&mut self, event: &OutputEvent, now: DateTime<Local>) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        let line = self.config.log_format.render(&Fields {
            time: now,
            host: &event.host,
            message: &event.line,
        });
        if let Err(err) = log.write_all(terminated(line).as_bytes()) {
            error!(error = %err, "log file write failed, no longer logging");
            self.log = None;
        }
    }

    fn banner(&mut self, now: DateTime<Local>) -> Result<()> {
        terminal::draw_banner(&mut self.terminal, self.active, now)?;
        self.terminal.flush().context("failed to flush terminal")
    }

    fn finish(&mut self) -> Result<()> {
        terminal::clear_line(&mut self.terminal)?;
        self.terminal.flush().context("failed to flush terminal")?;
        if let Some(log) = self.log.as_mut() {
            log.flush().context("failed to flush log file")?;
        }
        Ok(())
    }
}

fn terminated(mut line: String) -> String {
    if !line.ends_with('\n') {
        line.push('\n');
    }
    line
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::events::{self, StreamKind};
    use crate::format::{Palette, DEFAULT_FORMAT};

    fn config(filters: FilterSet) -> DispatchConfig {
        let palette = Palette::standard();
        DispatchConfig {
            filters,
            format: Template::parse(DEFAULT_FORMAT, &palette),
            log_format: Template::parse("%{host} %{message}", &palette),
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn dispatcher(filters: FilterSet) -> Dispatcher<Vec<u8>, Vec<u8>> {
        Dispatcher::new(config(filters), Vec::new(), Some(Vec::new()))
    }

    fn lifecycle(host: &str, kind: Lifecycle) -> LifecycleEvent {
        LifecycleEvent {
            host: host.to_string(),
            kind,
        }
    }

    fn texts(d: Dispatcher<Vec<u8>, Vec<u8>>) -> (String, String) {
        let (terminal, log) = d.into_parts();
        (
            String::from_utf8(terminal).unwrap(),
            String::from_utf8(log.unwrap_or_default()).unwrap(),
        )
    }

    #[test]
    fn counter_tracks_started_minus_finished() {
        let mut d = dispatcher(FilterSet::default());
        let sequence = [
            lifecycle("a", Lifecycle::Started),
            lifecycle("b", Lifecycle::Started),
            lifecycle("a", Lifecycle::Finished),
            lifecycle("c", Lifecycle::Started),
            lifecycle("b", Lifecycle::Finished),
        ];
        let mut expected = 0i64;
        for event in &sequence {
            d.on_lifecycle(event, now()).unwrap();
            expected += match event.kind {
                Lifecycle::Started => 1,
                Lifecycle::Finished => -1,
            };
            assert_eq!(d.active() as i64, expected);
        }
        let (terminal, _) = texts(d);
        assert!(terminal.contains("Moon running (1)"));
        assert!(terminal.contains("started\n"));
        assert!(terminal.contains("finished\n"));
    }

    #[test]
    fn counter_never_goes_negative() {
        let mut d = dispatcher(FilterSet::default());
        d.on_lifecycle(&lifecycle("x", Lifecycle::Finished), now()).unwrap();
        assert_eq!(d.active(), 0);
    }

    #[test]
    fn include_filter_drops_but_log_keeps() {
        let filters = FilterSet::new(&["ERROR"], &[], &[]).unwrap();
        let mut d = dispatcher(filters);
        d.on_output(&OutputEvent::new("h", "INFO: ok\n"), now()).unwrap();
        d.on_output(&OutputEvent::new("h", "ERROR: bad\n"), now()).unwrap();
        let (terminal, log) = texts(d);
        assert!(!terminal.contains("INFO: ok"));
        assert!(terminal.contains("ERROR: bad\n"));
        assert_eq!(log, "h INFO: ok\nh ERROR: bad\n");
    }

    #[test]
    fn exclude_beats_include() {
        let filters = FilterSet::new(&["ERROR"], &["DEBUG"], &[]).unwrap();
        let mut d = dispatcher(filters);
        d.on_output(&OutputEvent::new("h", "ERROR DEBUG dump\n"), now()).unwrap();
        let (terminal, log) = texts(d);
        assert!(!terminal.contains("dump"));
        assert_eq!(log, "h ERROR DEBUG dump\n");
    }

    #[test]
    fn highlight_only_reaches_the_terminal() {
        let filters = FilterSet::new(&[], &[], &["fail"]).unwrap();
        let mut d = dispatcher(filters);
        d.on_output(&OutputEvent::new("h", "task fail now\n"), now()).unwrap();
        let (terminal, log) = texts(d);
        assert!(terminal.contains("task \u{1b}[7mfail\u{1b}[27m now\n"));
        assert_eq!(log, "h task fail now\n");
    }

    #[test]
    fn partial_lines_are_terminated() {
        let mut d = dispatcher(FilterSet::default());
        d.on_output(&OutputEvent::new("h", "no newline"), now()).unwrap();
        let (terminal, log) = texts(d);
        assert!(terminal.contains("no newline\n"));
        assert_eq!(log, "h no newline\n");
    }

    #[test]
    fn works_without_a_log_file() {
        let mut d: Dispatcher<Vec<u8>, Vec<u8>> =
            Dispatcher::new(config(FilterSet::default()), Vec::new(), None);
        d.on_output(&OutputEvent::new("h", "x\n"), now()).unwrap();
        let (terminal, log) = d.into_parts();
        assert!(log.is_none());
        assert!(!terminal.is_empty());
    }

    #[tokio::test]
    async fn drain_shows_last_lines_before_finished() {
        let (tx, mut rx) = events::channel(16);
        tx.started("a").await;
        tx.line(StreamKind::Stdout, OutputEvent::new("a", "last words\n")).await;
        tx.line(StreamKind::Stderr, OutputEvent::new("a", "last complaint\n")).await;
        tx.finished("a").await;

        let mut d = dispatcher(FilterSet::default());
        assert_eq!(d.drain(&mut rx).unwrap(), 4);
        assert_eq!(d.active(), 0);
        let (terminal, _) = texts(d);
        let finished = terminal.find("finished").unwrap();
        assert!(terminal.find("last words").unwrap() < finished);
        assert!(terminal.find("last complaint").unwrap() < finished);
    }

    #[tokio::test]
    async fn log_round_trips_raw_lines_per_stream() {
        let (tx, rx) = events::channel(64);
        tx.started("a").await;
        tx.line(StreamKind::Stdout, OutputEvent::new("a", "1\n")).await;
        tx.line(StreamKind::Stdout, OutputEvent::new("a", "2\n")).await;
        tx.line(StreamKind::Stdout, OutputEvent::new("a", "3\n")).await;
        tx.finished("a").await;

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut terminal = Vec::new();
        let mut log = Vec::new();
        let d = Dispatcher::new(config(FilterSet::default()), &mut terminal, Some(&mut log));
        d.run(rx, shutdown).await.unwrap();

        assert_eq!(String::from_utf8(log).unwrap(), "a 1\na 2\na 3\n");
        let terminal = String::from_utf8(terminal).unwrap();
        assert!(terminal.contains("Moon running (0)"));
    }
}
