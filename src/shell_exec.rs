//! Uniform invocation of `git`, `gh`, and `curl`.
//!
//! All external command execution goes through the [`GitExecutor`] trait so
//! that every call site gets consistent logging, token injection, and error
//! classification — and so that actions are testable with a scripted stub.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Instant;

/// Environment variables consulted, in order, when a GitHub token is needed.
pub const GITHUB_TOKEN_VARS: &[&str] = &["GH_TOKEN", "GITHUB_TOKEN", "GITHUB_API_TOKEN"];

/// Resolve a GitHub token from the ambient environment.
pub fn resolve_github_token() -> Option<String> {
    GITHUB_TOKEN_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

/// Which external binary to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Git,
    Gh,
    Curl,
}

impl CommandKind {
    pub fn program(self) -> &'static str {
        match self {
            CommandKind::Git => "git",
            CommandKind::Gh => "gh",
            CommandKind::Curl => "curl",
        }
    }
}

/// Whether the invocation needs a GitHub token in its environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenRequirement {
    /// Inject a token when one resolves; warn and proceed otherwise.
    #[default]
    Optional,
    /// Fail with [`ShellError::MissingToken`] before spawning when no token
    /// resolves.
    Required,
}

/// One external invocation: argument vector, working directory, extra
/// environment, optional stdin bytes, and the token requirement.
#[derive(Debug, Clone, Default)]
pub struct CommandDetails {
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub token: TokenRequirement,
}

impl CommandDetails {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { args: args.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn require_token(mut self) -> Self {
        self.token = TokenRequirement::Required;
        self
    }

    /// `program arg1 arg2 …` rendering for logs and error messages.
    pub fn render(&self, kind: CommandKind) -> String {
        if self.args.is_empty() {
            kind.program().to_string()
        } else {
            format!("{} {}", kind.program(), self.args.join(" "))
        }
    }
}

/// Captured output of one external invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// First three non-empty lines of stderr (stdout when stderr is empty),
    /// joined with ` | `.
    pub fn summary(&self) -> String {
        let source = if self.stderr.trim().is_empty() { &self.stdout } else { &self.stderr };
        summarize_lines(source)
    }
}

fn summarize_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(3)
        .collect::<Vec<_>>()
        .join(" | ")
}

#[derive(Debug)]
pub enum ShellError {
    /// The process ran and exited non-zero.
    CommandFailed { command: String, output: CommandOutput },
    /// The process could not be started.
    ExecutionFailed { command: String, source: std::io::Error },
    /// A GitHub token was required but none resolved.
    MissingToken { command: String },
}

impl ShellError {
    /// Short human summary, suitable for event details.
    pub fn summary(&self) -> String {
        match self {
            ShellError::CommandFailed { output, .. } => output.summary(),
            ShellError::ExecutionFailed { source, .. } => source.to_string(),
            ShellError::MissingToken { .. } => format!(
                "no GitHub token found in {}",
                GITHUB_TOKEN_VARS.join(", ")
            ),
        }
    }
}

impl std::fmt::Display for ShellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShellError::CommandFailed { command, output } => {
                write!(f, "`{command}` exited with status {}: {}", output.status, output.summary())
            }
            ShellError::ExecutionFailed { command, source } => {
                write!(f, "failed to start `{command}`: {source}")
            }
            ShellError::MissingToken { command } => {
                write!(f, "`{command}` requires a GitHub token but none of {} is set",
                    GITHUB_TOKEN_VARS.join(", "))
            }
        }
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShellError::ExecutionFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// The one way to run external commands.
///
/// `run` reports only process-start failures and token failures as errors; a
/// non-zero exit is a normal [`CommandOutput`]. The provided `execute_*`
/// wrappers convert non-zero exits into [`ShellError::CommandFailed`] for
/// call sites that treat them as fatal.
pub trait GitExecutor: Send + Sync {
    fn run(&self, kind: CommandKind, details: CommandDetails) -> Result<CommandOutput, ShellError>;

    fn execute(&self, kind: CommandKind, details: CommandDetails) -> Result<CommandOutput, ShellError> {
        let command = details.render(kind);
        let output = self.run(kind, details)?;
        if output.success() {
            Ok(output)
        } else {
            Err(ShellError::CommandFailed { command, output })
        }
    }

    fn execute_git(&self, details: CommandDetails) -> Result<CommandOutput, ShellError> {
        self.execute(CommandKind::Git, details)
    }

    fn execute_gh(&self, details: CommandDetails) -> Result<CommandOutput, ShellError> {
        self.execute(CommandKind::Gh, details)
    }

    fn execute_curl(&self, details: CommandDetails) -> Result<CommandOutput, ShellError> {
        self.execute(CommandKind::Curl, details)
    }

    fn run_git(&self, details: CommandDetails) -> Result<CommandOutput, ShellError> {
        self.run(CommandKind::Git, details)
    }

    fn run_gh(&self, details: CommandDetails) -> Result<CommandOutput, ShellError> {
        self.run(CommandKind::Gh, details)
    }
}

/// How invocations are debug-logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogStyle {
    /// `$ git fetch --prune origin (12.3ms) ok=true`
    #[default]
    Human,
    /// `event=COMMAND_RUN program=git args=… status=0 dur_ms=12.3`
    Structured,
}

/// Production executor spawning real processes.
pub struct ShellExecutor {
    log_style: LogStyle,
}

impl ShellExecutor {
    pub fn new(log_style: LogStyle) -> Self {
        Self { log_style }
    }

    fn log(&self, command: &str, duration_ms: f64, outcome: &str) {
        match self.log_style {
            LogStyle::Human => log::debug!("$ {command} ({duration_ms:.1}ms) {outcome}"),
            LogStyle::Structured => {
                log::debug!("event=COMMAND_RUN command={command:?} dur_ms={duration_ms:.1} {outcome}")
            }
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(LogStyle::Human)
    }
}

impl GitExecutor for ShellExecutor {
    fn run(&self, kind: CommandKind, details: CommandDetails) -> Result<CommandOutput, ShellError> {
        let command = details.render(kind);

        let mut cmd = Command::new(kind.program());
        cmd.args(&details.args);
        if let Some(dir) = &details.dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &details.env {
            cmd.env(key, value);
        }

        // gh authenticates through its token env vars; make sure they are
        // populated from the ambient environment before spawning.
        if kind == CommandKind::Gh {
            match resolve_github_token() {
                Some(token) => {
                    cmd.env("GH_TOKEN", &token);
                    cmd.env("GITHUB_TOKEN", &token);
                }
                None => match details.token {
                    TokenRequirement::Required => {
                        return Err(ShellError::MissingToken { command });
                    }
                    TokenRequirement::Optional => {
                        log::warn!("no GitHub token resolved for `{command}`; proceeding unauthenticated");
                    }
                },
            }
        }

        if details.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ShellError::ExecutionFailed {
            command: command.clone(),
            source,
        })?;

        if let Some(bytes) = &details.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            // BrokenPipe is fine: the child may exit without reading stdin.
            if let Err(e) = stdin.write_all(bytes)
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(ShellError::ExecutionFailed { command, source: e });
            }
        }

        let output = child.wait_with_output().map_err(|source| ShellError::ExecutionFailed {
            command: command.clone(),
            source,
        })?;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        };
        self.log(&command, duration_ms, &format!("status={}", result.status));
        Ok(result)
    }
}
