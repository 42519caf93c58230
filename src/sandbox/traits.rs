/*!
 * Sandbox Runtime Trait
 * Builder/runtime collaborator and its structured failures
 */

use crate::compose::Descriptor;
use crate::core::{
    BuildError, OrchestratorError, RuntimeError, RuntimeErrorKind, Stage,
};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Observed state of a sandbox instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Stopped,
    Absent,
}

/// Step of a runtime call that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStage {
    /// Descriptor evaluation or build; nothing was installed
    Build,
    /// Installed, but the instance did not come up
    Start,
    Stop,
    Teardown,
    Query,
}

impl RuntimeStage {
    pub fn stage(self) -> Stage {
        match self {
            RuntimeStage::Build => Stage::Build,
            RuntimeStage::Start => Stage::Start,
            RuntimeStage::Stop => Stage::Stop,
            RuntimeStage::Teardown => Stage::Teardown,
            RuntimeStage::Query => Stage::Query,
        }
    }
}

/// Structured failure reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFailure {
    pub stage: RuntimeStage,
    pub message: String,
    /// Capability fragment implicated, when the runtime can tell
    pub fragment: Option<String>,
    pub timed_out_after: Option<Duration>,
    /// Raw tool output; logged, never returned to callers
    pub diagnostics: Option<String>,
}

impl RuntimeFailure {
    pub fn new(stage: RuntimeStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            fragment: None,
            timed_out_after: None,
            diagnostics: None,
        }
    }

    pub fn timed_out(stage: RuntimeStage, after: Duration) -> Self {
        Self {
            timed_out_after: Some(after),
            ..Self::new(stage, format!("no answer within {}ms", after.as_millis()))
        }
    }

    pub fn with_fragment(mut self, fragment: Option<String>) -> Self {
        self.fragment = fragment;
        self
    }

    pub fn with_diagnostics(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if !output.is_empty() {
            self.diagnostics = Some(output);
        }
        self
    }

    /// Translate into the caller-facing error for `workload`
    pub fn into_error(self, workload: &str) -> OrchestratorError {
        if let Some(after) = self.timed_out_after {
            return OrchestratorError::Timeout {
                workload: workload.to_string(),
                stage: self.stage.stage(),
                after_ms: after.as_millis() as u64,
            };
        }
        let kind = match self.stage {
            RuntimeStage::Build => {
                let mut err = BuildError::invocation(workload, self.message);
                err.fragment = self.fragment;
                err.diagnostics = self.diagnostics;
                return err.into();
            }
            RuntimeStage::Start => RuntimeErrorKind::StartFailed,
            RuntimeStage::Stop => RuntimeErrorKind::StopFailed,
            RuntimeStage::Teardown => RuntimeErrorKind::DestroyFailed,
            RuntimeStage::Query => RuntimeErrorKind::QueryFailed,
        };
        let mut err = RuntimeError::new(kind, workload, self.message);
        err.diagnostics = self.diagnostics;
        err.into()
    }
}

impl fmt::Display for RuntimeFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} failed: {}", self.stage, self.message)
    }
}

/// External builder and sandbox runtime
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Build the descriptor, install the instance and start it
    async fn materialize(&self, descriptor: &Descriptor) -> Result<(), RuntimeFailure>;

    /// Start; an already running instance is success
    async fn start(&self, name: &str) -> Result<(), RuntimeFailure>;

    /// Stop; an already stopped instance is success
    async fn stop(&self, name: &str) -> Result<(), RuntimeFailure>;

    /// Remove the instance; an unknown instance is success
    async fn destroy(&self, name: &str) -> Result<(), RuntimeFailure>;

    async fn status(&self, name: &str) -> Result<InstanceStatus, RuntimeFailure>;

    /// The instance's most recent `lines` journal lines, oldest first
    async fn logs(&self, name: &str, lines: usize) -> Result<Vec<String>, RuntimeFailure>;
}
