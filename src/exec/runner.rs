/*!
 * Command Runner
 * Narrow async interface over external CLI tools
 */

use crate::core::TimeoutPolicy;
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// A command to run: program, arguments and timeout
#[derive(Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: TimeoutPolicy,
    /// Argument values masked when the command is displayed
    sensitive: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: TimeoutPolicy::None,
            sensitive: Vec::new(),
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

    pub fn timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mark a value as secret; it is masked wherever the command is displayed
    pub fn redact(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.sensitive.push(secret);
        }
        self
    }

    /// True if `needle` appears as a whole argument
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }

    fn mask(&self, value: &str) -> String {
        self.sensitive
            .iter()
            .fold(value.to_string(), |acc, secret| acc.replace(secret.as_str(), "****"))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", self.mask(arg))?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CommandSpec({})", self)
    }
}

/// Typed result of a finished (or timed-out) command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal or timed out
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }

    /// stderr, or stdout when stderr is empty
    pub fn error_text(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    /// Both streams, for diagnostics capture
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }

    /// Case-insensitive search across both streams
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.stdout.to_ascii_lowercase().contains(&needle)
            || self.stderr.to_ascii_lowercase().contains(&needle)
    }
}

/// Execute external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion or timeout
    ///
    /// `Err` only when the program could not be spawned at all; a non-zero
    /// exit or a timeout is reported through `CommandOutput`.
    async fn run(&self, spec: CommandSpec) -> std::io::Result<CommandOutput>;
}

/// Runs commands as child processes via tokio
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: CommandSpec) -> std::io::Result<CommandOutput> {
        debug!(command = %spec, timeout = spec.timeout.category(), "Running command");
        let start = Instant::now();

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match spec.timeout.run(child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    duration: start.elapsed(),
                    timed_out: false,
                })
            }
            // Dropping the future drops the child, which kills it
            Err(after) => {
                debug!(command = %spec, after_ms = after.as_millis() as u64, "Command timed out");
                Ok(CommandOutput {
                    status: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: start.elapsed(),
                    timed_out: true,
                })
            }
        }
    }
}
