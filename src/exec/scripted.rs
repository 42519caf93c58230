/*!
 * Scripted Command Runner
 * Deterministic stand-in for external tools; records every call
 */

use super::runner::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

impl CommandOutput {
    /// Exit 0 with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Non-zero exit with the given stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    /// Killed after exceeding its timeout
    pub fn timeout(after: Duration) -> Self {
        Self {
            status: None,
            duration: after,
            timed_out: true,
            ..Default::default()
        }
    }
}

struct Rule {
    program: String,
    needles: Vec<String>,
    output: CommandOutput,
    once: bool,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        spec.program == self.program && self.needles.iter().all(|n| spec.has_arg(n))
    }
}

/// Answers commands from a script of rules
///
/// One-shot rules are consumed in registration order before persistent
/// rules are consulted; the most recently registered persistent rule wins.
/// Unmatched commands succeed with empty output.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<Vec<CommandSpec>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to every matching command with `output`
    pub fn on(&self, program: &str, needles: &[&str], output: CommandOutput) -> &Self {
        self.push(program, needles, output, false)
    }

    /// Respond to the next matching command only
    pub fn on_once(&self, program: &str, needles: &[&str], output: CommandOutput) -> &Self {
        self.push(program, needles, output, true)
    }

    fn push(&self, program: &str, needles: &[&str], output: CommandOutput, once: bool) -> &Self {
        self.rules.lock().push(Rule {
            program: program.to_string(),
            needles: needles.iter().map(|n| n.to_string()).collect(),
            output,
            once,
        });
        self
    }

    /// Every command run so far
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// Commands whose program and arguments include all `needles`
    pub fn calls_matching(&self, program: &str, needles: &[&str]) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.program == program && needles.iter().all(|n| c.has_arg(n)))
            .cloned()
            .collect()
    }

    fn respond(&self, spec: &CommandSpec) -> CommandOutput {
        let mut rules = self.rules.lock();
        if let Some(pos) = rules.iter().position(|r| r.once && r.matches(spec)) {
            return rules.remove(pos).output;
        }
        rules
            .iter()
            .rev()
            .find(|r| !r.once && r.matches(spec))
            .map(|r| r.output.clone())
            .unwrap_or_else(|| CommandOutput::ok(""))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: CommandSpec) -> std::io::Result<CommandOutput> {
        let output = self.respond(&spec);
        self.calls.lock().push(spec);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_once_rules_take_priority_then_expire() {
        let runner = ScriptedRunner::new();
        runner
            .on("zfs", &["list"], CommandOutput::ok("tank"))
            .on_once("zfs", &["list"], CommandOutput::failed(1, "missing"));

        let first = runner.run(CommandSpec::new("zfs").arg("list")).await.unwrap();
        let second = runner.run(CommandSpec::new("zfs").arg("list")).await.unwrap();

        assert_eq!(first.status, Some(1));
        assert_eq!(second.stdout, "tank");
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_commands_succeed() {
        let runner = ScriptedRunner::new();
        let output = runner.run(CommandSpec::new("true")).await.unwrap();
        assert!(output.success());
        assert_eq!(runner.calls_matching("true", &[]).len(), 1);
    }
}
