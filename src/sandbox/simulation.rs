/*!
 * Simulated Sandbox Runtime
 * In-memory instances with failure injection and latency
 */

use super::traits::{InstanceStatus, RuntimeFailure, RuntimeStage, SandboxRuntime};
use crate::compose::Descriptor;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Runtime operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    /// Build phase of `materialize`
    Build,
    /// Start phase of `materialize`, and `start`
    Start,
    Stop,
    Destroy,
    Status,
    Logs,
}

impl RuntimeOp {
    fn stage(self) -> RuntimeStage {
        match self {
            RuntimeOp::Build => RuntimeStage::Build,
            RuntimeOp::Start => RuntimeStage::Start,
            RuntimeOp::Stop => RuntimeStage::Stop,
            RuntimeOp::Destroy => RuntimeStage::Teardown,
            RuntimeOp::Status | RuntimeOp::Logs => RuntimeStage::Query,
        }
    }
}

/// How an injected failure behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeFault {
    Fail,
    /// Build failure attributed to a capability fragment
    BrokenFragment(String),
    /// Report a timeout; with `completes` the effect happens anyway
    TimeOut { completes: bool },
}

#[derive(Debug, Clone)]
struct SimInstance {
    status: InstanceStatus,
    descriptor: Descriptor,
    journal: Vec<String>,
}

#[derive(Clone, Default)]
pub struct SimulatedRuntime {
    instances: Arc<DashMap<String, SimInstance>>,
    faults: Arc<DashMap<RuntimeOp, (RuntimeFault, u32)>>,
    builds: Arc<AtomicU32>,
    latency: Arc<Mutex<Duration>>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        info!("Sandbox runtime initialized (simulation mode)");
        Self::default()
    }

    /// Apply `fault` to the next `times` calls of `op`
    pub fn fail_next(&self, op: RuntimeOp, fault: RuntimeFault, times: u32) {
        self.faults.insert(op, (fault, times));
    }

    /// Delay every build by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn instance_status(&self, name: &str) -> InstanceStatus {
        self.instances
            .get(name)
            .map(|i| i.status)
            .unwrap_or(InstanceStatus::Absent)
    }

    pub fn descriptor(&self, name: &str) -> Option<Descriptor> {
        self.instances.get(name).map(|i| i.descriptor.clone())
    }

    /// Names of installed instances, sorted
    pub fn instances(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }

    /// Remove an instance behind the orchestrator's back
    pub fn vanish(&self, name: &str) {
        self.instances.remove(name);
    }

    /// Change an instance's state behind the orchestrator's back
    pub fn set_status(&self, name: &str, status: InstanceStatus) {
        if let Some(mut instance) = self.instances.get_mut(name) {
            instance.status = status;
        }
    }

    /// Append a journal line to an installed instance
    pub fn log(&self, name: &str, line: impl Into<String>) {
        if let Some(mut instance) = self.instances.get_mut(name) {
            instance.journal.push(line.into());
        }
    }

    fn take_fault(&self, op: RuntimeOp) -> Option<RuntimeFault> {
        let mut exhausted = false;
        let fault = self.faults.get_mut(&op).map(|mut entry| {
            entry.1 = entry.1.saturating_sub(1);
            exhausted = entry.1 == 0;
            entry.0.clone()
        });
        if exhausted {
            self.faults.remove(&op);
        }
        fault
    }

    fn failure(op: RuntimeOp, fault: &RuntimeFault) -> RuntimeFailure {
        match fault {
            RuntimeFault::Fail => RuntimeFailure::new(op.stage(), format!("injected {:?} failure", op))
                .with_diagnostics("simulated runtime failure"),
            RuntimeFault::BrokenFragment(id) => {
                RuntimeFailure::new(op.stage(), format!("fragment '{}' failed to evaluate", id))
                    .with_fragment(Some(id.clone()))
                    .with_diagnostics(format!("error: undefined variable in modules/{}.nix", id))
            }
            RuntimeFault::TimeOut { .. } => RuntimeFailure::timed_out(op.stage(), Duration::from_secs(1)),
        }
    }

    fn set(&self, name: &str, status: InstanceStatus) -> bool {
        match self.instances.get_mut(name) {
            Some(mut instance) => {
                instance.status = status;
                instance.journal.push(format!("{} container {}", transition_verb(status), name));
                true
            }
            None => false,
        }
    }
}

fn transition_verb(status: InstanceStatus) -> &'static str {
    match status {
        InstanceStatus::Running => "Started",
        InstanceStatus::Stopped => "Stopped",
        InstanceStatus::Absent => "Removed",
    }
}

#[async_trait]
impl SandboxRuntime for SimulatedRuntime {
    async fn materialize(&self, descriptor: &Descriptor) -> Result<(), RuntimeFailure> {
        let name = descriptor.name.as_str();
        self.builds.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let install = |status| {
            self.instances.insert(
                name.to_string(),
                SimInstance {
                    status,
                    descriptor: descriptor.clone(),
                    journal: vec![format!("{} container {}", transition_verb(status), name)],
                },
            );
        };

        if let Some(fault) = self.take_fault(RuntimeOp::Build) {
            if fault == (RuntimeFault::TimeOut { completes: true }) {
                install(InstanceStatus::Running);
            }
            return Err(Self::failure(RuntimeOp::Build, &fault));
        }
        if let Some(fault) = self.take_fault(RuntimeOp::Start) {
            let status = match fault {
                RuntimeFault::TimeOut { completes: true } => InstanceStatus::Running,
                _ => InstanceStatus::Stopped,
            };
            install(status);
            return Err(Self::failure(RuntimeOp::Start, &fault));
        }

        install(InstanceStatus::Running);
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeFailure> {
        if let Some(fault) = self.take_fault(RuntimeOp::Start) {
            return Err(Self::failure(RuntimeOp::Start, &fault));
        }
        if self.set(name, InstanceStatus::Running) {
            Ok(())
        } else {
            Err(RuntimeFailure::new(RuntimeStage::Start, format!("Machine '{}' not known", name)))
        }
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeFailure> {
        if let Some(fault) = self.take_fault(RuntimeOp::Stop) {
            return Err(Self::failure(RuntimeOp::Stop, &fault));
        }
        if self.set(name, InstanceStatus::Stopped) {
            Ok(())
        } else {
            Err(RuntimeFailure::new(RuntimeStage::Stop, format!("Machine '{}' not known", name)))
        }
    }

    async fn destroy(&self, name: &str) -> Result<(), RuntimeFailure> {
        if let Some(fault) = self.take_fault(RuntimeOp::Destroy) {
            if fault == (RuntimeFault::TimeOut { completes: true }) {
                self.instances.remove(name);
            }
            return Err(Self::failure(RuntimeOp::Destroy, &fault));
        }
        self.instances.remove(name);
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<InstanceStatus, RuntimeFailure> {
        if let Some(fault) = self.take_fault(RuntimeOp::Status) {
            return Err(Self::failure(RuntimeOp::Status, &fault));
        }
        Ok(self.instance_status(name))
    }

    async fn logs(&self, name: &str, lines: usize) -> Result<Vec<String>, RuntimeFailure> {
        if let Some(fault) = self.take_fault(RuntimeOp::Logs) {
            return Err(Self::failure(RuntimeOp::Logs, &fault));
        }
        let journal = self
            .instances
            .get(name)
            .map(|i| i.journal.clone())
            .unwrap_or_default();
        let skip = journal.len().saturating_sub(lines);
        Ok(journal.into_iter().skip(skip).collect())
    }
}
