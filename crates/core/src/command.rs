//! External command execution.
//!
//! Everything the pipeline does to a repository goes through a
//! [`CommandRunner`]: [`ProcessRunner`] spawns real processes, and
//! [`RecordingRunner`] records what would have been run so the pipeline can
//! be exercised without git, bundler or network access.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::CommandError;

// ---------------------------------------------------------------------------
// Command description
// ---------------------------------------------------------------------------

/// A fully described external command.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; `None` inherits the caller's.
    pub cwd: Option<PathBuf>,
    /// Variables removed from the inherited environment.
    pub env_remove: Vec<String>,
    /// Substrings masked whenever the command is displayed or logged.
    secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env_remove: Vec::new(),
            secrets: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Mask `secret` in every rendering of this command.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    /// Replace every registered secret in `text` with `***`.
    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), "***"))
    }

    /// The unredacted command line. Only for matching, never for output.
    fn raw_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redact(&self.raw_line()))
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("command", &self.to_string())
            .field("cwd", &self.cwd)
            .field("env_remove", &self.env_remove)
            .finish()
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

// ---------------------------------------------------------------------------
// Runner trait
// ---------------------------------------------------------------------------

/// Runs external commands. A non-zero exit is [`CommandError::Failed`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Spawns real child processes and waits for them.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for key in &spec.env_remove {
            cmd.env_remove(key);
        }

        debug!(cmd = %spec, cwd = ?spec.cwd, "running command");
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CommandError::BinaryNotFound(spec.program.clone())
            } else {
                CommandError::IoError(e)
            }
        })?;

        let stdout = spec.redact(&String::from_utf8_lossy(&output.stdout));
        let stderr = spec.redact(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(cmd = %spec, exit_code, %stderr, "command failed");
            return Err(CommandError::Failed {
                command: spec.to_string(),
                exit_code,
                stderr,
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }
}

// ---------------------------------------------------------------------------
// Recording runner
// ---------------------------------------------------------------------------

type Hook = Arc<dyn Fn(&CommandSpec) + Send + Sync>;

struct Failure {
    prefix: String,
    exit_code: i32,
    stderr: String,
}

/// A runner that records every command instead of executing it.
///
/// Commands succeed with empty output unless a failure was scripted with
/// [`fail_on`](Self::fail_on). Hooks registered with [`on`](Self::on) run
/// before the command is answered, which lets tests simulate side effects
/// such as a clone creating files.
#[derive(Default)]
pub struct RecordingRunner {
    recorded: Mutex<Vec<CommandSpec>>,
    failures: Vec<Failure>,
    hooks: Vec<(String, Hook)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail commands whose command line starts with `prefix`.
    pub fn fail_on(mut self, prefix: &str, exit_code: i32, stderr: &str) -> Self {
        self.failures.push(Failure {
            prefix: prefix.to_string(),
            exit_code,
            stderr: stderr.to_string(),
        });
        self
    }

    /// Run `hook` for commands whose command line starts with `prefix`.
    pub fn on<F>(mut self, prefix: &str, hook: F) -> Self
    where
        F: Fn(&CommandSpec) + Send + Sync + 'static,
    {
        self.hooks.push((prefix.to_string(), Arc::new(hook)));
        self
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.recorded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Redacted command lines, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.commands().iter().map(ToString::to_string).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.recorded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(spec.clone());

        let line = spec.raw_line();
        for (prefix, hook) in &self.hooks {
            if line.starts_with(prefix.as_str()) {
                hook(spec);
            }
        }
        if let Some(failure) = self.failures.iter().find(|f| line.starts_with(f.prefix.as_str())) {
            return Err(CommandError::Failed {
                command: spec.to_string(),
                exit_code: failure.exit_code,
                stderr: failure.stderr.clone(),
            });
        }
        Ok(CommandOutput::default())
    }
}
