//! Shared test doubles for crate-internal unit tests.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::confirm::{Confirmation, Prompter};
use crate::llm::{ChatClient, ChatRequest};
use crate::shell_exec::{CommandDetails, CommandKind, CommandOutput, GitExecutor, ShellError};

/// Scripted response rule: the first rule whose pattern is a prefix of the
/// joined argument string answers the call.
type Rule = (String, Result<CommandOutput, &'static str>);

/// Executor double that records every call and answers from a script.
///
/// Calls not matched by any rule succeed with empty output, so tests only
/// script the interesting invocations.
pub(crate) struct ScriptedExecutor {
    rules: Vec<Rule>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new<S: Into<String>>(rules: Vec<(S, Result<CommandOutput, &'static str>)>) -> Self {
        Self {
            rules: rules.into_iter().map(|(pattern, response)| (pattern.into(), response)).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Executor with no scripted rules: every call succeeds with empty
    /// output.
    pub fn silent() -> Self {
        Self { rules: Vec::new(), calls: Mutex::new(Vec::new()) }
    }

    /// `program arg1 arg2 …` for every call, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_made(&self, needle: &str) -> bool {
        self.calls().iter().any(|call| call.contains(needle))
    }
}

pub(crate) fn ok_output(stdout: &str) -> Result<CommandOutput, &'static str> {
    Ok(CommandOutput { stdout: stdout.to_string(), stderr: String::new(), status: 0 })
}

pub(crate) fn failed_output(status: i32, stderr: &str) -> Result<CommandOutput, &'static str> {
    Ok(CommandOutput { stdout: String::new(), stderr: stderr.to_string(), status })
}

impl GitExecutor for ScriptedExecutor {
    fn run(&self, kind: CommandKind, details: CommandDetails) -> Result<CommandOutput, ShellError> {
        let rendered = details.render(kind);
        self.calls.lock().unwrap().push(rendered.clone());

        let joined = details.args.join(" ");
        for (pattern, response) in &self.rules {
            if joined.starts_with(pattern) {
                return match response {
                    Ok(output) => Ok(output.clone()),
                    Err(message) => Err(ShellError::ExecutionFailed {
                        command: rendered,
                        source: std::io::Error::other(*message),
                    }),
                };
            }
        }
        Ok(CommandOutput::default())
    }
}

/// Growable byte sink usable as a reporter writer from multiple owners.
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Prompter double with a fixed answer sequence; repeats the last answer
/// when the script runs out.
pub(crate) struct ScriptedPrompter {
    answers: Mutex<Vec<Confirmation>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: Vec<Confirmation>) -> Self {
        Self { answers: Mutex::new(answers), prompts: Mutex::new(Vec::new()) }
    }

    pub fn always(confirmed: bool) -> Self {
        Self::new(vec![Confirmation { confirmed, apply_to_all: false }])
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, prompt: &str) -> std::io::Result<Confirmation> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut answers = self.answers.lock().unwrap();
        if answers.len() > 1 {
            Ok(answers.remove(0))
        } else {
            Ok(answers
                .first()
                .copied()
                .unwrap_or(Confirmation { confirmed: false, apply_to_all: false }))
        }
    }
}

/// Chat double returning a fixed completion.
pub(crate) struct ScriptedChat {
    pub response: String,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new(response: impl Into<String>) -> Self {
        Self { response: response.into(), requests: Mutex::new(Vec::new()) }
    }
}

impl ChatClient for ScriptedChat {
    fn chat(&self, request: &ChatRequest) -> anyhow::Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.response.clone())
    }
}
