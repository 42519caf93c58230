/*!
 * Container Runtime
 * Builder and runtime driven through the container CLI tools
 *
 * `extra-container` builds and installs a rendered expression in one step;
 * `nixos-container` handles control calls. Output that reaches the install
 * phase marks a start-stage failure, which means an instance may exist and
 * must be torn down before storage is touched.
 */

use super::traits::{InstanceStatus, RuntimeFailure, RuntimeStage, SandboxRuntime};
use crate::compose::Descriptor;
use crate::core::{TimeoutConfig, TimeoutPolicy};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const BUILDER_CLI: &str = "extra-container";
const CONTAINER_CLI: &str = "nixos-container";
const JOURNAL_CLI: &str = "journalctl";

/// Printed by the builder once the build finished and installation began
const INSTALL_SENTINEL: &str = "Installing containers:";

pub struct ContainerRuntime {
    runner: Arc<dyn CommandRunner>,
    flake_path: PathBuf,
    scratch_dir: PathBuf,
    timeouts: TimeoutConfig,
    /// Set after the first successful build; later builds get the warm timeout
    warm: AtomicBool,
}

impl ContainerRuntime {
    pub fn new(runner: Arc<dyn CommandRunner>, flake_path: impl Into<PathBuf>, timeouts: TimeoutConfig) -> Self {
        Self {
            runner,
            flake_path: flake_path.into(),
            scratch_dir: std::env::temp_dir(),
            timeouts,
            warm: AtomicBool::new(false),
        }
    }

    /// Directory for rendered expressions (default: the OS temp dir)
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn is_warm(&self) -> bool {
        self.warm.load(Ordering::SeqCst)
    }

    async fn run(&self, spec: CommandSpec, stage: RuntimeStage) -> Result<CommandOutput, RuntimeFailure> {
        let program = spec.program.clone();
        let output = self.runner.run(spec).await.map_err(|e| {
            RuntimeFailure::new(stage, format!("could not run {}: {}", program, e))
        })?;
        if output.timed_out {
            return Err(RuntimeFailure::timed_out(stage, output.duration));
        }
        Ok(output)
    }

    async fn control(&self, action: &str, name: &str, stage: RuntimeStage) -> Result<CommandOutput, RuntimeFailure> {
        let spec = CommandSpec::new(CONTAINER_CLI)
            .args([action, name])
            .timeout(self.timeouts.runtime);
        self.run(spec, stage).await
    }

    fn journal(&self, source: [String; 2], lines: usize) -> CommandSpec {
        CommandSpec::new(JOURNAL_CLI)
            .args(source)
            .arg(format!("-n{}", lines))
            .args(["--no-pager", "-o", "short-iso"])
            .timeout(self.timeouts.runtime)
    }

    /// Write the expression to a private file; it may embed the auth token
    async fn write_expression(&self, name: &str, expression: &str) -> Result<PathBuf, RuntimeFailure> {
        let path = self
            .scratch_dir
            .join(format!("orchestrator-{}-{}.nix", name, Uuid::new_v4()));
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let write = async {
            let mut file = options.open(&path).await?;
            file.write_all(expression.as_bytes()).await?;
            file.flush().await
        };
        write.await.map_err(|e| {
            RuntimeFailure::new(
                RuntimeStage::Build,
                format!("could not write builder input {}: {}", path.display(), e),
            )
        })?;
        Ok(path)
    }
}

/// Capability whose fragment file the builder output points at
fn implicated_fragment(descriptor: &Descriptor, output: &CommandOutput) -> Option<String> {
    descriptor
        .capabilities
        .iter()
        .find(|id| {
            output.mentions(&format!("/{}.", id)) || output.mentions(&format!("/{}/", id))
        })
        .cloned()
}

fn journal_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("-- No entries"))
        .map(str::to_string)
        .collect()
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "Could not remove builder input");
    }
}

#[async_trait]
impl SandboxRuntime for ContainerRuntime {
    async fn materialize(&self, descriptor: &Descriptor) -> Result<(), RuntimeFailure> {
        let name = descriptor.name.as_str();
        let expression = descriptor.render_expression(&self.flake_path);
        let input = self.write_expression(name, &expression).await?;

        let warm = self.is_warm();
        let timeout: TimeoutPolicy = self.timeouts.build_for(warm);
        info!(workload = name, warm, timeout_category = timeout.category(), "Invoking builder");

        let spec = CommandSpec::new(BUILDER_CLI)
            .args(["create", "--start"])
            .arg(input.to_string_lossy())
            .timeout(timeout);
        let result = self.run(spec, RuntimeStage::Build).await;
        remove_quietly(&input).await;
        let output = result?;

        if output.success() {
            self.warm.store(true, Ordering::SeqCst);
            info!(workload = name, elapsed_ms = output.duration.as_millis() as u64, "Sandbox installed and started");
            return Ok(());
        }

        let diagnostics = output.combined();
        error!(workload = name, status = ?output.status, output = %diagnostics, "Builder failed");
        if output.stdout.contains(INSTALL_SENTINEL) {
            // Build succeeded; the install/start phase did not
            self.warm.store(true, Ordering::SeqCst);
            return Err(
                RuntimeFailure::new(RuntimeStage::Start, "sandbox was installed but failed to start")
                    .with_diagnostics(diagnostics),
            );
        }
        Err(RuntimeFailure::new(RuntimeStage::Build, "builder could not build the workload")
            .with_fragment(implicated_fragment(descriptor, &output))
            .with_diagnostics(diagnostics))
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeFailure> {
        let output = self.control("start", name, RuntimeStage::Start).await?;
        if output.success() || output.mentions("already running") {
            return Ok(());
        }
        Err(RuntimeFailure::new(RuntimeStage::Start, "sandbox failed to start")
            .with_diagnostics(output.combined()))
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeFailure> {
        let output = self.control("stop", name, RuntimeStage::Stop).await?;
        if output.success() || output.mentions("not running") {
            return Ok(());
        }
        Err(RuntimeFailure::new(RuntimeStage::Stop, "sandbox failed to stop")
            .with_diagnostics(output.combined()))
    }

    async fn destroy(&self, name: &str) -> Result<(), RuntimeFailure> {
        let spec = CommandSpec::new(BUILDER_CLI)
            .args(["destroy", name])
            .timeout(self.timeouts.runtime);
        let output = self.run(spec, RuntimeStage::Teardown).await?;
        if output.success() {
            return Ok(());
        }
        if output.mentions("not known") || output.mentions("not found") || output.mentions("no such") {
            debug!(workload = name, "Sandbox already gone");
            return Ok(());
        }
        warn!(workload = name, stderr = %output.error_text(), "Sandbox teardown failed");
        Err(RuntimeFailure::new(RuntimeStage::Teardown, "sandbox teardown failed")
            .with_diagnostics(output.combined()))
    }

    async fn status(&self, name: &str) -> Result<InstanceStatus, RuntimeFailure> {
        let output = self.control("status", name, RuntimeStage::Query).await?;
        if output.success() {
            return Ok(match output.stdout.trim() {
                "up" => InstanceStatus::Running,
                "gone" => InstanceStatus::Absent,
                _ => InstanceStatus::Stopped,
            });
        }
        if output.mentions("not known") || output.mentions("no such") || output.mentions("does not exist") {
            return Ok(InstanceStatus::Absent);
        }
        Err(RuntimeFailure::new(RuntimeStage::Query, "sandbox status query failed")
            .with_diagnostics(output.combined()))
    }

    /// The machine journal, falling back to the host unit's journal when
    /// the machine has none (stopped, or journal not persistent)
    async fn logs(&self, name: &str, lines: usize) -> Result<Vec<String>, RuntimeFailure> {
        let machine = self.journal([format!("-M{}", name), "--quiet".to_string()], lines);
        let output = self.run(machine, RuntimeStage::Query).await?;
        if output.success() {
            let entries = journal_lines(&output.stdout);
            if !entries.is_empty() {
                return Ok(entries);
            }
        }

        debug!(workload = name, "Machine journal empty; reading host unit journal");
        let unit = self.journal(["-u".to_string(), format!("container@{}", name)], lines);
        let output = self.run(unit, RuntimeStage::Query).await?;
        if output.success() {
            return Ok(journal_lines(&output.stdout));
        }
        Err(RuntimeFailure::new(RuntimeStage::Query, "journal query failed")
            .with_diagnostics(output.combined()))
    }
}
