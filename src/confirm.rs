//! Confirmation prompts with apply-to-all memory.

use std::cell::Cell;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Mutex;

/// Outcome of one confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub confirmed: bool,
    /// `true` when the user answered `a` — confirm and remember.
    pub apply_to_all: bool,
}

pub trait Prompter: Send + Sync {
    fn confirm(&self, prompt: &str) -> io::Result<Confirmation>;
}

/// Interactive prompter reading `[y/N/a]` answers from stdin.
///
/// The prompt is written to stderr so stdout stays reserved for data. When
/// stdin is not a terminal the answer defaults to *no*.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&self, prompt: &str) -> io::Result<Confirmation> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(Confirmation { confirmed: false, apply_to_all: false });
        }
        let mut stderr = io::stderr();
        write!(stderr, "{prompt} [y/N/a] ")?;
        stderr.flush()?;

        let mut response = String::new();
        stdin.lock().read_line(&mut response)?;
        Ok(parse_response(&response))
    }
}

/// Map one answer line to a confirmation. Anything unrecognized is *no*.
pub fn parse_response(response: &str) -> Confirmation {
    match response.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Confirmation { confirmed: true, apply_to_all: false },
        "a" | "all" => Confirmation { confirmed: true, apply_to_all: true },
        _ => Confirmation { confirmed: false, apply_to_all: false },
    }
}

/// Serializes prompts so concurrent workers never interleave on the
/// terminal. The CLI wraps the terminal prompter in this before handing it
/// to the runner.
pub struct LockedPrompter<P: Prompter> {
    inner: Mutex<P>,
}

impl<P: Prompter> LockedPrompter<P> {
    pub fn new(inner: P) -> Self {
        Self { inner: Mutex::new(inner) }
    }
}

impl<P: Prompter> Prompter for LockedPrompter<P> {
    fn confirm(&self, prompt: &str) -> io::Result<Confirmation> {
        let guard = self.inner.lock().expect("prompter lock poisoned");
        guard.confirm(prompt)
    }
}

/// Apply-to-all memory.
///
/// Scope decision: per repository. The runner hands each repository a fresh
/// state, so answering `a` auto-confirms the remainder of that repository's
/// tasks and nested actions, and nothing beyond it.
#[derive(Debug, Default)]
pub struct PromptState {
    auto_confirm: Cell<bool>,
}

impl PromptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_confirm(&self) -> bool {
        self.auto_confirm.get()
    }

    pub fn remember_all(&self) {
        self.auto_confirm.set(true);
    }
}
