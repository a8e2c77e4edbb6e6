//! The task runner: fan-out over repositories, per-repo task sequencing,
//! outcome aggregation.
//!
//! One repository is handled end-to-end by a single worker, so a
//! repository's tasks never interleave and its events appear in action
//! order. Cross-repository interleaving is unordered; the reporter
//! serializes the actual output lines.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::confirm::{PromptState, Prompter};
use crate::discovery::{self, DiscoveryError};
use crate::domain::RepositoryPath;
use crate::fsys::FileSystem;
use crate::github::GitHubResolver;
use crate::llm::ChatClient;
use crate::repo::RepositoryManager;
use crate::report::{DurationStats, Event, EventCode, Reporter};
use crate::shell_exec::GitExecutor;

use super::planner::{self, TaskPlan};
use super::registry::ActionRegistry;
use super::{
    CancellationToken, Environment, RepositoryState, RuntimeOptions, TaskDefinition, WorkflowError,
};

/// One recorded failure: repository, event code, message.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub repository: String,
    pub code: EventCode,
    pub message: String,
}

/// Aggregated result of one run.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub failures: Vec<FailureRecord>,
    /// Wall-clock per action type.
    pub durations: BTreeMap<String, DurationStats>,
}

impl ExecutionOutcome {
    fn merge(&mut self, other: ExecutionOutcome) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.cancelled |= other.cancelled;
        self.failures.extend(other.failures);
        for (action, stats) in other.durations {
            self.durations.entry(action).or_default().merge(&stats);
        }
    }
}

/// Poll interval of the run-timeout watchdog.
const WATCHDOG_TICK: Duration = Duration::from_millis(50);

/// How one task ended, as far as the repository loop is concerned.
enum TaskFlow {
    Continue,
    StopRepository,
    Fatal(WorkflowError),
    Cancelled,
}

pub struct TaskRunner {
    exec: Arc<dyn GitExecutor>,
    repos: RepositoryManager,
    github: GitHubResolver,
    fs: Arc<dyn FileSystem>,
    reporter: Arc<Reporter>,
    prompter: Arc<dyn Prompter>,
    chat: Option<Arc<dyn ChatClient>>,
    registry: &'static ActionRegistry,
}

impl TaskRunner {
    pub fn new(
        exec: Arc<dyn GitExecutor>,
        fs: Arc<dyn FileSystem>,
        reporter: Arc<Reporter>,
        prompter: Arc<dyn Prompter>,
        chat: Option<Arc<dyn ChatClient>>,
    ) -> Self {
        Self {
            repos: RepositoryManager::new(Arc::clone(&exec)),
            github: GitHubResolver::new(Arc::clone(&exec)),
            exec,
            fs,
            reporter,
            prompter,
            chat,
            registry: ActionRegistry::builtin(),
        }
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Discover repositories under `roots` and run `tasks` against each.
    pub fn run(
        &self,
        cancel: &CancellationToken,
        roots: &[PathBuf],
        tasks: &[TaskDefinition],
        options: &RuntimeOptions,
    ) -> Result<ExecutionOutcome, WorkflowError> {
        options.validate()?;

        let repositories = discovery::discover_repositories(self.exec.as_ref(), roots)
            .map_err(discovery_error)?;

        let workers = options.effective_workers().min(repositories.len()).max(1);
        let (tx, rx) = crossbeam_channel::unbounded::<RepositoryPath>();
        for repository in repositories {
            let _ = tx.send(repository);
        }
        drop(tx);

        // Per-run timeout: a watchdog trips the cancel token at the
        // deadline, so no new actions or repositories start; the command
        // already in flight finishes on its own.
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog_done = Arc::new(AtomicBool::new(false));
        let mut watchdog = None;
        if let Some(timeout) = options.timeout {
            if timeout.is_zero() {
                timed_out.store(true, Ordering::SeqCst);
                cancel.cancel();
            } else {
                let deadline = Instant::now() + timeout;
                let cancel = cancel.clone();
                let timed_out = Arc::clone(&timed_out);
                let done = Arc::clone(&watchdog_done);
                watchdog = Some(std::thread::spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        if Instant::now() >= deadline {
                            timed_out.store(true, Ordering::SeqCst);
                            cancel.cancel();
                            break;
                        }
                        std::thread::sleep(WATCHDOG_TICK);
                    }
                }));
            }
        }

        let mut outcome = ExecutionOutcome::default();
        let mut fatal: Option<WorkflowError> = None;

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                let rx = rx.clone();
                handles.push(scope.spawn(|| {
                    let rx = rx;
                    let mut partial = ExecutionOutcome::default();
                    let mut worker_fatal = None;
                    while let Ok(path) = rx.recv() {
                        if cancel.is_cancelled() {
                            partial.cancelled = true;
                            break;
                        }
                        if let Err(err) =
                            self.process_repository(cancel, path, tasks, options, &mut partial)
                        {
                            // Fatal-for-run: stop handing out work everywhere.
                            worker_fatal = Some(err);
                            cancel.cancel();
                            break;
                        }
                    }
                    (partial, worker_fatal)
                }));
            }
            for handle in handles {
                let (partial, worker_fatal) = handle.join().expect("worker panicked");
                outcome.merge(partial);
                if fatal.is_none() {
                    fatal = worker_fatal;
                }
            }
        });

        watchdog_done.store(true, Ordering::SeqCst);
        if let Some(handle) = watchdog {
            let _ = handle.join();
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        if cancel.is_cancelled() {
            outcome.cancelled = true;
            let mut event = Event::warn(
                EventCode::RunCancelled,
                "-",
                "cancellation observed; partial outcome returned",
            );
            if timed_out.load(Ordering::SeqCst) {
                event = event
                    .with_detail("reason", "timeout")
                    .with_detail("timeout_ms", options.timeout.unwrap_or_default().as_millis().to_string());
            }
            self.reporter.report(event);
        }

        self.reporter.print_summary();
        Ok(outcome)
    }

    /// Handle one repository end-to-end. `Err` means fatal-for-run.
    fn process_repository(
        &self,
        cancel: &CancellationToken,
        path: RepositoryPath,
        tasks: &[TaskDefinition],
        options: &RuntimeOptions,
        outcome: &mut ExecutionOutcome,
    ) -> Result<(), WorkflowError> {
        let name = path.folder_name();
        let inspect_started = Instant::now();
        let mut state =
            match RepositoryState::inspect(&self.repos, path, &options.remote_or_origin()) {
                Ok(state) => state,
                Err(err) => {
                    let err = WorkflowError::from(err);
                    self.record_failure(outcome, &name, &err, "inspect");
                    return Ok(());
                }
            };
        self.reporter.record_stage_duration("inspect", inspect_started.elapsed());

        let env = Environment {
            exec: self.exec.as_ref(),
            repos: &self.repos,
            github: &self.github,
            fs: self.fs.as_ref(),
            reporter: &self.reporter,
            prompter: self.prompter.as_ref(),
            chat: self.chat.as_deref(),
            options,
            cancel,
            prompts: PromptState::new(),
        };

        for task in tasks {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            match self.run_single_task(&env, &mut state, task, outcome) {
                TaskFlow::Continue => {}
                TaskFlow::StopRepository => break,
                TaskFlow::Cancelled => {
                    outcome.cancelled = true;
                    break;
                }
                TaskFlow::Fatal(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn run_single_task(
        &self,
        env: &Environment<'_>,
        state: &mut RepositoryState,
        task: &TaskDefinition,
        outcome: &mut ExecutionOutcome,
    ) -> TaskFlow {
        let name = state.name();

        // Task-level declarative safeguards short-circuit the whole task.
        if let Some(spec) = &task.safeguards {
            let guards = match planner::guards_from_safeguards(spec) {
                Ok(guards) => guards,
                Err(err) => return self.handle_error(outcome, &name, &task.name, err),
            };
            for guard in &guards {
                match guard.evaluate(env, state) {
                    Ok(result) if result.pass => {}
                    Ok(result) => {
                        self.report_skip(&name, &task.name, guard.label(), &result.reason);
                        outcome.skipped += 1;
                        return TaskFlow::Continue;
                    }
                    Err(err) => return self.handle_error(outcome, &name, &task.name, err),
                }
            }
        }

        let plan_started = Instant::now();
        let plan: TaskPlan = match planner::plan_task(self.registry, task, state) {
            Ok(plan) => plan,
            Err(err) => return self.handle_error(outcome, &name, &task.name, err),
        };
        self.reporter.record_stage_duration("plan", plan_started.elapsed());
        self.reporter.report(
            Event::info(EventCode::TaskPlan, &name, format!("planned task {}", task.name))
                .at_path(state.path.as_path())
                .with_detail("task", &task.name)
                .with_detail("steps", plan.steps.len().to_string()),
        );

        for step in &plan.steps {
            if env.cancel.is_cancelled() {
                return TaskFlow::Cancelled;
            }

            for guard in &step.guards {
                match guard.evaluate(env, state) {
                    Ok(result) if result.pass => {}
                    Ok(result) => {
                        self.report_skip(&name, &task.name, guard.label(), &result.reason);
                        outcome.skipped += 1;
                        return TaskFlow::Continue;
                    }
                    Err(err) => return self.handle_error(outcome, &name, &task.name, err),
                }
            }

            let started = Instant::now();
            let result = (step.handler)(env, state, &step.options);
            let elapsed = started.elapsed();
            self.reporter.record_operation_duration(&step.action, elapsed);
            outcome.durations.entry(step.action.clone()).or_default().record(elapsed);

            match result {
                Ok(()) => outcome.succeeded += 1,
                Err(err) => return self.handle_error(outcome, &name, &task.name, err),
            }
        }

        TaskFlow::Continue
    }

    fn report_skip(&self, repository: &str, task: &str, guard: &str, reason: &str) {
        self.reporter.report(
            Event::warn(EventCode::TaskSkip, repository, format!("skipping task {task}"))
                .with_detail("task", task)
                .with_detail("guard", guard)
                .with_detail("reason", reason),
        );
    }

    fn record_failure(
        &self,
        outcome: &mut ExecutionOutcome,
        repository: &str,
        err: &WorkflowError,
        task: &str,
    ) {
        self.reporter.report(
            Event::error(err.code(), repository, err.to_string()).with_detail("task", task),
        );
        outcome.failed += 1;
        outcome.failures.push(FailureRecord {
            repository: repository.to_string(),
            code: err.code(),
            message: err.to_string(),
        });
    }

    fn handle_error(
        &self,
        outcome: &mut ExecutionOutcome,
        repository: &str,
        task: &str,
        err: WorkflowError,
    ) -> TaskFlow {
        self.record_failure(outcome, repository, &err, task);
        match err.fatality() {
            super::Fatality::Run => TaskFlow::Fatal(err),
            super::Fatality::Repo => TaskFlow::StopRepository,
            super::Fatality::Action => TaskFlow::Continue,
        }
    }
}

fn discovery_error(err: DiscoveryError) -> WorkflowError {
    match err {
        DiscoveryError::Io { source, .. } => WorkflowError::Io(source),
        DiscoveryError::Shell(err) => WorkflowError::Shell(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsys::StdFileSystem;
    use crate::testing::{ScriptedExecutor, ScriptedPrompter, SharedBuffer, failed_output, ok_output};
    use crate::workflow::{ActionDefinition, OptionValue};
    use indexmap::indexmap;

    fn fake_repo(root: &std::path::Path, rel: &str) {
        std::fs::create_dir_all(root.join(rel).join(".git")).unwrap();
    }

    fn runner_with(exec: ScriptedExecutor) -> (TaskRunner, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let reporter =
            Reporter::with_writers(Box::new(out.clone()), Box::new(err.clone()));
        let runner = TaskRunner::new(
            Arc::new(exec),
            Arc::new(StdFileSystem),
            Arc::new(reporter),
            Arc::new(ScriptedPrompter::always(true)),
            None,
        );
        (runner, out, err)
    }

    fn stage_task() -> TaskDefinition {
        TaskDefinition::single("stage-all", ActionDefinition::new("stage", OptionMap::new()))
    }

    use crate::workflow::OptionMap;

    #[test]
    fn zero_workers_is_fatal_for_run() {
        let (runner, _out, _err) = runner_with(ScriptedExecutor::silent());
        let options = RuntimeOptions { workers: 0, ..RuntimeOptions::default() };
        let result = runner.run(&CancellationToken::new(), &[], &[stage_task()], &options);
        assert!(matches!(result, Err(WorkflowError::Configuration { .. })));
    }

    #[test]
    fn runs_each_task_per_repository_and_prints_summary() {
        let tmp = tempfile::tempdir().unwrap();
        fake_repo(tmp.path(), "alpha");
        fake_repo(tmp.path(), "beta");

        let (runner, out, _err) = runner_with(ScriptedExecutor::silent());
        let outcome = runner
            .run(
                &CancellationToken::new(),
                &[tmp.path().to_path_buf()],
                &[stage_task()],
                &RuntimeOptions::default(),
            )
            .unwrap();

        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 0);
        assert!(!outcome.cancelled);
        assert!(outcome.durations.contains_key("stage"));

        let output = out.contents();
        assert!(output.contains("TASK_PLAN"));
        let summary = output.lines().find(|l| l.starts_with("Summary: ")).unwrap();
        assert!(summary.contains("total.repos=2"));
    }

    #[test]
    fn failing_safeguard_skips_task_but_not_repository() {
        let tmp = tempfile::tempdir().unwrap();
        fake_repo(tmp.path(), "dirty");

        // Status reports a tracked change, so require_clean fails; the
        // second task still runs.
        let exec = ScriptedExecutor::new(vec![(
            "status --porcelain",
            ok_output(" M main.go\n"),
        )]);
        let (runner, out, _err) = runner_with(exec);

        let mut guarded = stage_task();
        guarded.safeguards = Some(crate::workflow::SafeguardSpec {
            require_clean: true,
            branch: None,
            paths: Vec::new(),
        });
        let tasks = vec![guarded, stage_task()];

        let outcome = runner
            .run(
                &CancellationToken::new(),
                &[tmp.path().to_path_buf()],
                &tasks,
                &RuntimeOptions::default(),
            )
            .unwrap();

        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.succeeded, 1);
        assert!(out.contents().contains("TASK_SKIP"));
    }

    #[test]
    fn action_error_is_recorded_and_later_tasks_still_run() {
        let tmp = tempfile::tempdir().unwrap();
        fake_repo(tmp.path(), "flaky");

        // `git add -A` fails; the later commitless task still runs.
        let exec = ScriptedExecutor::new(vec![(
            "add -A",
            failed_output(1, "fatal: unable to write index\n"),
        )]);
        let (runner, _out, err) = runner_with(exec);

        let tasks = vec![stage_task(), stage_task()];
        let outcome = runner
            .run(
                &CancellationToken::new(),
                &[tmp.path().to_path_buf()],
                &tasks,
                &RuntimeOptions::default(),
            )
            .unwrap();

        // Both tasks attempt the same failing action.
        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].code, EventCode::ActionFail);
        assert!(err.contents().contains("ACTION_FAIL"));
    }

    #[test]
    fn cancellation_stops_dispatch_and_reports() {
        let tmp = tempfile::tempdir().unwrap();
        fake_repo(tmp.path(), "one");
        fake_repo(tmp.path(), "two");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let (runner, out, _err) = runner_with(ScriptedExecutor::silent());
        let outcome = runner
            .run(
                &cancel,
                &[tmp.path().to_path_buf()],
                &[stage_task()],
                &RuntimeOptions::default(),
            )
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.succeeded, 0);
        assert!(out.contents().contains("RUN_CANCELLED"));
    }

    #[test]
    fn elapsed_run_timeout_stops_dispatch_with_timeout_reason() {
        let tmp = tempfile::tempdir().unwrap();
        fake_repo(tmp.path(), "one");
        fake_repo(tmp.path(), "two");

        // A zero timeout is already expired when dispatch starts, so no
        // repository is picked up at all.
        let (runner, out, _err) = runner_with(ScriptedExecutor::silent());
        let options = RuntimeOptions {
            timeout: Some(std::time::Duration::ZERO),
            ..RuntimeOptions::default()
        };
        let outcome = runner
            .run(
                &CancellationToken::new(),
                &[tmp.path().to_path_buf()],
                &[stage_task()],
                &options,
            )
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.succeeded, 0);
        let output = out.contents();
        assert!(output.contains("RUN_CANCELLED"));
        assert!(output.contains("reason=timeout"));
    }

    #[test]
    fn generous_run_timeout_does_not_disturb_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        fake_repo(tmp.path(), "solo");

        let (runner, out, _err) = runner_with(ScriptedExecutor::silent());
        let options = RuntimeOptions {
            timeout: Some(std::time::Duration::from_secs(3600)),
            ..RuntimeOptions::default()
        };
        let outcome = runner
            .run(
                &CancellationToken::new(),
                &[tmp.path().to_path_buf()],
                &[stage_task()],
                &options,
            )
            .unwrap();

        assert!(!outcome.cancelled);
        assert_eq!(outcome.succeeded, 1);
        assert!(!out.contents().contains("RUN_CANCELLED"));
    }

    #[test]
    fn unknown_action_fails_plan_without_stopping_run() {
        let tmp = tempfile::tempdir().unwrap();
        fake_repo(tmp.path(), "solo");

        let (runner, _out, _err) = runner_with(ScriptedExecutor::silent());
        let bogus = TaskDefinition::single(
            "bogus",
            ActionDefinition::new("frobnicate", indexmap! {
                "value".to_string() => OptionValue::Int(1),
            }),
        );
        let outcome = runner
            .run(
                &CancellationToken::new(),
                &[tmp.path().to_path_buf()],
                &[bogus, stage_task()],
                &RuntimeOptions::default(),
            )
            .unwrap();

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.succeeded, 1);
    }
}
