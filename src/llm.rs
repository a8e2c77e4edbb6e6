//! Chat client contract and the command-backed implementation.
//!
//! The engine only consumes `chat(request) -> text`. The default
//! implementation pipes the prompt into an external CLI (`llm` by default)
//! over stdin, the same way hook commands receive their context.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::Context;

/// One two-message chat exchange.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// System message: composition rules.
    pub system: String,
    /// User message: repository context and instruction.
    pub user: String,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout: Option<Duration>,
}

pub trait ChatClient: Send + Sync {
    /// Returns the raw completion text. An empty completion is returned
    /// as-is; classifying it is the caller's concern.
    fn chat(&self, request: &ChatRequest) -> anyhow::Result<String>;
}

/// Chat client that shells out to an external LLM CLI, writing the prompt to
/// its stdin and reading the completion from stdout.
pub struct CommandChatClient {
    command: String,
    args: Vec<String>,
    /// Name of the environment variable holding the API key.
    api_key_env: String,
}

impl CommandChatClient {
    pub const DEFAULT_COMMAND: &'static str = "llm";
    pub const DEFAULT_API_KEY_ENV: &'static str = "OPENAI_API_KEY";

    pub fn new(command: impl Into<String>, args: Vec<String>, api_key_env: Option<String>) -> Self {
        Self {
            command: command.into(),
            args,
            api_key_env: api_key_env.unwrap_or_else(|| Self::DEFAULT_API_KEY_ENV.to_string()),
        }
    }
}

impl Default for CommandChatClient {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COMMAND, Vec::new(), None)
    }
}

impl ChatClient for CommandChatClient {
    fn chat(&self, request: &ChatRequest) -> anyhow::Result<String> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        if let Some(model) = &request.model {
            cmd.arg("-m").arg(model);
        }
        if let Some(max_tokens) = request.max_tokens {
            cmd.arg("-o").arg("max_tokens").arg(max_tokens.to_string());
        }
        if let Some(temperature) = request.temperature {
            cmd.arg("-o").arg("temperature").arg(temperature.to_string());
        }
        if !request.system.is_empty() {
            cmd.arg("-s").arg(&request.system);
        }
        // A non-default key variable is mapped onto the conventional one so
        // the child sees it where it expects it.
        if self.api_key_env != Self::DEFAULT_API_KEY_ENV
            && let Ok(key) = std::env::var(&self.api_key_env)
        {
            cmd.env(Self::DEFAULT_API_KEY_ENV, key);
        }
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        log::debug!("$ {} (chat, {} prompt chars)", self.command, request.user.len());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn chat command `{}`", self.command))?;

        // BrokenPipe is fine: the command may exit without reading stdin.
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(request.user.as_bytes())
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e).context("failed to write prompt to chat command stdin");
        }

        // A hung chat CLI must not block the worker forever: past the
        // deadline the child is killed and reaped.
        let output = match request.timeout {
            Some(timeout) => {
                use wait_timeout::ChildExt;
                match child
                    .wait_timeout(timeout)
                    .context("failed to wait for chat command")?
                {
                    Some(_) => child
                        .wait_with_output()
                        .context("failed to collect chat command output")?,
                    None => {
                        let _ = child.kill();
                        let _ = child.wait();
                        anyhow::bail!(
                            "chat command `{}` timed out after {:?}",
                            self.command,
                            timeout
                        );
                    }
                }
            }
            None => child.wait_with_output().context("failed to wait for chat command")?,
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("chat command `{}` failed: {}", self.command, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
