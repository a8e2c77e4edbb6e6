//! Structured event stream and run summary.
//!
//! One line per event, fixed-width human half plus a sorted `k=v` machine
//! half. The reporter is shared by all workers; everything mutable sits
//! behind one lock so output lines are never torn.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Closed vocabulary of event codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCode {
    RepoSwitched,
    RepoDirty,
    RemoteMissing,
    TaskPlan,
    TaskSkip,
    ActionFail,
    FetchSkip,
    PullSkip,
    DeleteSkip,
    PagesSkip,
    PrRetargetSkip,
    ProtectionSkip,
    HistorySkip,
    HistoryPurge,
    NamespaceRewrite,
    NamespaceSkip,
    BranchCleanup,
    BranchDeleted,
    CommitMessage,
    DefaultBranch,
    RunCancelled,
}

/// One structured event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Stamped by the reporter when absent.
    pub timestamp: Option<DateTime<Local>>,
    pub level: Level,
    pub code: EventCode,
    /// Repository identifier (folder name or owner/repo).
    pub repository: String,
    pub path: Option<PathBuf>,
    pub message: String,
    pub details: BTreeMap<String, String>,
}

impl Event {
    pub fn new(
        level: Level,
        code: EventCode,
        repository: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: None,
            level,
            code,
            repository: repository.into(),
            path: None,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn info(code: EventCode, repository: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Info, code, repository, message)
    }

    pub fn warn(code: EventCode, repository: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Warn, code, repository, message)
    }

    pub fn error(code: EventCode, repository: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Error, code, repository, message)
    }

    pub fn at_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// `HH:MM:SS LEVEL CODE REPO MESSAGE | k=v …`, machine half sorted by
    /// key and always carrying `event=<CODE>`.
    fn format_line(&self, stamp: DateTime<Local>) -> String {
        let mut pairs = self.details.clone();
        pairs.insert("event".to_string(), self.code.to_string());
        let machine = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{} {:<5} {:<18} {:<34} {:<40} | {}",
            stamp.format("%H:%M:%S"),
            self.level.to_string(),
            self.code.to_string(),
            self.repository,
            self.message,
            machine
        )
    }
}

/// Count/total accumulator for one operation or stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurationStats {
    pub count: usize,
    pub total: Duration,
}

impl DurationStats {
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total += duration;
    }

    pub fn merge(&mut self, other: &DurationStats) {
        self.count += other.count;
        self.total += other.total;
    }

    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// Snapshot returned by [`Reporter::summary`].
#[derive(Debug, Clone)]
pub struct SummaryData {
    pub total_repositories: usize,
    pub duration: Duration,
    pub events: usize,
    pub counts_by_code: BTreeMap<EventCode, usize>,
    pub counts_by_level: BTreeMap<Level, usize>,
    pub operations: BTreeMap<String, DurationStats>,
    pub stages: BTreeMap<String, DurationStats>,
}

struct ReporterInner {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    events: usize,
    counts_by_code: BTreeMap<EventCode, usize>,
    counts_by_level: BTreeMap<Level, usize>,
    repositories: BTreeSet<String>,
    operations: BTreeMap<String, DurationStats>,
    stages: BTreeMap<String, DurationStats>,
}

pub struct Reporter {
    started: Instant,
    inner: Mutex<ReporterInner>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::with_writers(Box::new(std::io::stdout()), Box::new(std::io::stderr()))
    }

    pub fn with_writers(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(ReporterInner {
                out,
                err,
                events: 0,
                counts_by_code: BTreeMap::new(),
                counts_by_level: BTreeMap::new(),
                repositories: BTreeSet::new(),
                operations: BTreeMap::new(),
                stages: BTreeMap::new(),
            }),
        }
    }

    /// Record and print one event. ERROR lines go to the error writer, the
    /// rest to the output writer.
    pub fn report(&self, event: Event) {
        let stamp = event.timestamp.unwrap_or_else(Local::now);
        let line = event.format_line(stamp);
        let mut inner = self.inner.lock().expect("reporter lock poisoned");
        inner.events += 1;
        *inner.counts_by_code.entry(event.code).or_default() += 1;
        *inner.counts_by_level.entry(event.level).or_default() += 1;
        // "-" marks run-scope events (e.g. RUN_CANCELLED); they do not count
        // as an observed repository.
        if event.repository != "-" {
            inner.repositories.insert(event.repository.clone());
        }
        let writer = if event.level == Level::Error { &mut inner.err } else { &mut inner.out };
        let _ = writeln!(writer, "{line}");
        let _ = writer.flush();
    }

    /// Write one raw data line to the output writer, under the same lock as
    /// event lines. Handlers never write to stdout directly; generated
    /// payloads (commit messages, CSV rows) go through here.
    pub fn print_data(&self, line: &str) {
        let mut inner = self.inner.lock().expect("reporter lock poisoned");
        let _ = writeln!(inner.out, "{line}");
        let _ = inner.out.flush();
    }

    pub fn record_operation_duration(&self, operation: &str, duration: Duration) {
        let mut inner = self.inner.lock().expect("reporter lock poisoned");
        inner.operations.entry(operation.to_string()).or_default().record(duration);
    }

    pub fn record_stage_duration(&self, stage: &str, duration: Duration) {
        let mut inner = self.inner.lock().expect("reporter lock poisoned");
        inner.stages.entry(stage.to_string()).or_default().record(duration);
    }

    pub fn summary(&self) -> SummaryData {
        let inner = self.inner.lock().expect("reporter lock poisoned");
        SummaryData {
            total_repositories: inner.repositories.len(),
            duration: self.started.elapsed(),
            events: inner.events,
            counts_by_code: inner.counts_by_code.clone(),
            counts_by_level: inner.counts_by_level.clone(),
            operations: inner.operations.clone(),
            stages: inner.stages.clone(),
        }
    }

    /// Print the single `Summary: …` line.
    pub fn print_summary(&self) {
        let summary = self.summary();
        let mut parts = vec![format!("total.repos={}", summary.total_repositories)];
        for (code, count) in &summary.counts_by_code {
            parts.push(format!("{code}={count}"));
        }
        let warns = summary.counts_by_level.get(&Level::Warn).copied().unwrap_or(0);
        let errors = summary.counts_by_level.get(&Level::Error).copied().unwrap_or(0);
        parts.push(format!("WARN={warns}"));
        parts.push(format!("ERROR={errors}"));
        // Humanize at millisecond resolution; sub-ms noise only obscures.
        let millis = summary.duration.as_millis() as u64;
        parts.push(format!(
            "duration_human={}",
            humantime::format_duration(Duration::from_millis(millis))
        ));
        parts.push(format!("duration_ms={millis}"));
        self.print_data(&format!("Summary: {}", parts.join(" ")));
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SharedBuffer;

    fn capture_reporter() -> (Reporter, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let reporter = Reporter::with_writers(Box::new(out.clone()), Box::new(err.clone()));
        (reporter, out, err)
    }

    #[test]
    fn event_line_has_sorted_machine_half_with_event_key() {
        let event = Event::info(EventCode::RepoSwitched, "example", "switched branch")
            .with_detail("source", "remote_default")
            .with_detail("branch", "main")
            .with_detail("created", "false");
        let stamp = DateTime::parse_from_rfc3339("2026-03-01T09:15:42+00:00")
            .unwrap()
            .with_timezone(&Local);
        let line = event.format_line(stamp);
        let (_, machine) = line.split_once(" | ").expect("machine half present");
        assert_eq!(machine, "branch=main created=false event=REPO_SWITCHED source=remote_default");
        assert!(line.contains("INFO "));
        assert!(line.contains("REPO_SWITCHED"));
    }

    #[test]
    fn error_events_go_to_error_writer() {
        let (reporter, out, err) = capture_reporter();
        reporter.report(Event::error(EventCode::ActionFail, "example", "push failed"));
        reporter.report(Event::info(EventCode::TaskPlan, "example", "planned"));
        assert!(err.contents().contains("ACTION_FAIL"));
        assert!(!out.contents().contains("ACTION_FAIL"));
        assert!(out.contents().contains("TASK_PLAN"));
    }

    #[test]
    fn code_counts_sum_to_event_total() {
        let (reporter, _out, _err) = capture_reporter();
        reporter.report(Event::warn(EventCode::FetchSkip, "a", "skip"));
        reporter.report(Event::warn(EventCode::FetchSkip, "b", "skip"));
        reporter.report(Event::info(EventCode::RepoSwitched, "a", "switched"));
        let summary = reporter.summary();
        let total: usize = summary.counts_by_code.values().sum();
        assert_eq!(total, summary.events);
        assert_eq!(summary.total_repositories, 2);
        assert_eq!(summary.counts_by_code[&EventCode::FetchSkip], 2);
    }

    #[test]
    fn summary_line_contains_counts_and_duration() {
        let (reporter, out, _err) = capture_reporter();
        reporter.report(Event::warn(EventCode::TaskSkip, "repo-one", "dirty worktree"));
        reporter.print_summary();
        let output = out.contents();
        let summary_line = output
            .lines()
            .find(|line| line.starts_with("Summary: "))
            .expect("summary line printed");
        assert!(summary_line.contains("total.repos=1"));
        assert!(summary_line.contains("TASK_SKIP=1"));
        assert!(summary_line.contains("WARN=1"));
        assert!(summary_line.contains("ERROR=0"));
        assert!(summary_line.contains("duration_ms="));
    }

    #[test]
    fn duration_stats_average() {
        let mut stats = DurationStats::default();
        stats.record(Duration::from_millis(100));
        stats.record(Duration::from_millis(300));
        assert_eq!(stats.count, 2);
        assert_eq!(stats.average(), Duration::from_millis(200));
    }
}
