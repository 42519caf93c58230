/*!
 * Orchestrator
 * Guarded entry points: every call is traced, serialized per name and
 * checked against the requester before reaching the controller
 */

use crate::core::limits::{DEFAULT_LOG_LINES, MAX_LOG_LINES};
use crate::core::{
    Backend, ConfigError, OrchestratorConfig, OrchestratorError, OrchestratorResult, OwnershipError,
    Requester, ValidationError, WorkloadRecord,
};
use crate::exec::{CommandRunner, TokioCommandRunner};
use crate::monitoring::OperationSpan;
use crate::network::{MeshNetwork, NetworkIdentityManager, SimulatedMesh, TailscaleCli};
use crate::registry::CapabilityRegistry;
use crate::sandbox::{
    CleanupReport, ContainerRuntime, DestroyOutcome, PendingCleanup, SandboxRuntime, SimulatedRuntime,
    WorkloadController, WorkloadInspection, WorkloadLogs,
};
use crate::security::{LockManager, NameLease, OwnershipGuard};
use crate::storage::{
    Quota, SimulatedVolumes, StorageLayout, StorageManager, StorageUsage, VolumeManager,
    ZfsVolumeManager,
};
use crate::validation::{validate_workload_name, SpecValidator, WorkloadRequest};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// In-memory collaborators behind a simulated orchestrator
#[derive(Clone)]
pub struct SimulationHandles {
    pub volumes: SimulatedVolumes,
    pub runtime: SimulatedRuntime,
    pub mesh: SimulatedMesh,
}

pub struct Orchestrator {
    controller: WorkloadController,
    guard: OwnershipGuard,
    locks: LockManager,
}

impl Orchestrator {
    pub fn new(controller: WorkloadController, locks: LockManager) -> Self {
        Self {
            controller,
            guard: OwnershipGuard::new(),
            locks,
        }
    }

    /// Wire collaborators for the configured backend
    pub fn from_config(config: &OrchestratorConfig, registry: CapabilityRegistry) -> Result<Self, ConfigError> {
        match config.backend {
            Backend::System => {
                let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::new());
                let volumes = Arc::new(ZfsVolumeManager::new(Arc::clone(&runner), config.timeouts.clone()));
                let mesh = Arc::new(TailscaleCli::new(Arc::clone(&runner), config.timeouts.clone()));
                let runtime = Arc::new(ContainerRuntime::new(
                    runner,
                    config.flake_path.clone(),
                    config.timeouts.clone(),
                ));
                info!(pool = %config.storage_pool, flake = %config.flake_path.display(), "Using system collaborators");
                Self::assemble(config, registry, volumes, mesh, runtime)
            }
            Backend::Simulation => Self::simulated(config, registry).map(|(orchestrator, _)| orchestrator),
        }
    }

    /// Orchestrator over in-memory collaborators, with handles to them
    pub fn simulated(
        config: &OrchestratorConfig,
        registry: CapabilityRegistry,
    ) -> Result<(Self, SimulationHandles), ConfigError> {
        let handles = SimulationHandles {
            volumes: SimulatedVolumes::new(),
            runtime: SimulatedRuntime::new(),
            mesh: SimulatedMesh::new(),
        };
        let orchestrator = Self::assemble(
            config,
            registry,
            Arc::new(handles.volumes.clone()),
            Arc::new(handles.mesh.clone()),
            Arc::new(handles.runtime.clone()),
        )?;
        Ok((orchestrator, handles))
    }

    fn assemble(
        config: &OrchestratorConfig,
        registry: CapabilityRegistry,
        volumes: Arc<dyn VolumeManager>,
        mesh: Arc<dyn MeshNetwork>,
        runtime: Arc<dyn SandboxRuntime>,
    ) -> Result<Self, ConfigError> {
        let quota = Quota::parse(&config.owner_quota).map_err(|reason| ConfigError::InvalidValue {
            var: "ORCH_OWNER_QUOTA",
            value: config.owner_quota.clone(),
            reason,
        })?;
        let storage = StorageManager::new(
            volumes,
            StorageLayout::new(config.storage_pool.clone(), config.storage_mount_root.clone()),
            quota,
        );
        let network = NetworkIdentityManager::new(mesh)
            .with_timeouts(config.timeouts.enroll, config.timeouts.deregister);
        let validator = SpecValidator::new(registry).with_default_token(config.mesh_auth_key.clone());
        let controller = WorkloadController::new(validator, storage, network, runtime);
        Ok(Self::new(controller, LockManager::new(config.timeouts.lock)))
    }

    pub fn controller(&self) -> &WorkloadController {
        &self.controller
    }

    async fn traced<T, F>(
        &self,
        operation: &'static str,
        requester: &Requester,
        workload: Option<&str>,
        fut: F,
    ) -> OrchestratorResult<T>
    where
        F: Future<Output = OrchestratorResult<T>>,
    {
        let span = OperationSpan::new(operation, requester.as_str(), workload);
        let result = fut.instrument(span.span().clone()).await;
        span.finish(&result);
        result
    }

    /// Syntactic name check, lock, then ownership of the existing record
    async fn lease_owned(&self, requester: &Requester, name: &str) -> OrchestratorResult<NameLease> {
        validate_workload_name(name)?;
        let lease = self.locks.acquire(name).await?;
        let owner = self
            .controller
            .owner_of(name)
            .ok_or_else(|| OrchestratorError::NotFound {
                workload: name.to_string(),
            })?;
        self.guard.check(requester, name, &owner)?;
        Ok(lease)
    }

    /// Create a workload owned by `requester`
    ///
    /// The request's owner must be the requester. The name is checked
    /// before the lock is taken so malformed names never enter the lock table.
    pub async fn create(&self, requester: &Requester, request: WorkloadRequest) -> OrchestratorResult<WorkloadRecord> {
        let name = request.name.clone().unwrap_or_default();
        self.traced("create", requester, Some(&name), async {
            if name.is_empty() {
                return Err(ValidationError::missing_field("name").into());
            }
            validate_workload_name(&name)?;
            if let Some(owner) = request.owner.as_deref().filter(|o| !o.trim().is_empty()) {
                if owner != requester.as_str() {
                    return Err(OwnershipError::NotOwner {
                        workload: name.clone(),
                        requester: requester.to_string(),
                    }
                    .into());
                }
            }

            let _lease = self.locks.acquire(&name).await?;
            if let Some(owner) = self.controller.owner_of(&name) {
                self.guard.check(requester, &name, &owner)?;
            }
            self.controller.create(&request).await
        })
        .await
    }

    pub async fn start(&self, requester: &Requester, name: &str) -> OrchestratorResult<WorkloadRecord> {
        self.traced("start", requester, Some(name), async {
            let _lease = self.lease_owned(requester, name).await?;
            self.controller.start(name).await
        })
        .await
    }

    pub async fn stop(&self, requester: &Requester, name: &str) -> OrchestratorResult<WorkloadRecord> {
        self.traced("stop", requester, Some(name), async {
            let _lease = self.lease_owned(requester, name).await?;
            self.controller.stop(name).await
        })
        .await
    }

    pub async fn destroy(&self, requester: &Requester, name: &str) -> OrchestratorResult<DestroyOutcome> {
        self.traced("destroy", requester, Some(name), async {
            let _lease = self.lease_owned(requester, name).await?;
            self.controller.destroy(name).await
        })
        .await
    }

    /// Query the runtime and correct the record; use after a timeout
    pub async fn reconcile(&self, requester: &Requester, name: &str) -> OrchestratorResult<WorkloadRecord> {
        self.traced("reconcile", requester, Some(name), async {
            let _lease = self.lease_owned(requester, name).await?;
            self.controller.reconcile(name).await
        })
        .await
    }

    /// Snapshot of one record; does not wait behind in-flight operations
    pub async fn status(&self, requester: &Requester, name: &str) -> OrchestratorResult<WorkloadRecord> {
        self.traced("status", requester, Some(name), async {
            validate_workload_name(name)?;
            let record = self
                .controller
                .get(name)
                .ok_or_else(|| OrchestratorError::NotFound {
                    workload: name.to_string(),
                })?;
            self.guard.check(requester, name, &record.owner)?;
            Ok(record)
        })
        .await
    }

    /// Ownership check on an existing record without taking the name lock
    fn check_owned(&self, requester: &Requester, name: &str) -> OrchestratorResult<()> {
        validate_workload_name(name)?;
        let owner = self
            .controller
            .owner_of(name)
            .ok_or_else(|| OrchestratorError::NotFound {
                workload: name.to_string(),
            })?;
        self.guard.check(requester, name, &owner)?;
        Ok(())
    }

    /// Live detail view; read-only, so it does not wait behind in-flight
    /// operations on the name
    pub async fn inspect(&self, requester: &Requester, name: &str) -> OrchestratorResult<WorkloadInspection> {
        self.traced("inspect", requester, Some(name), async {
            self.check_owned(requester, name)?;
            self.controller.inspect(name).await
        })
        .await
    }

    /// Recent journal lines, capped at `MAX_LOG_LINES`
    pub async fn logs(&self, requester: &Requester, name: &str, lines: Option<usize>) -> OrchestratorResult<WorkloadLogs> {
        let lines = lines.unwrap_or(DEFAULT_LOG_LINES).clamp(1, MAX_LOG_LINES);
        self.traced("logs", requester, Some(name), async {
            self.check_owned(requester, name)?;
            self.controller.logs(name, lines).await
        })
        .await
    }

    /// The requester's workloads, sorted by name
    pub fn list(&self, requester: &Requester) -> Vec<WorkloadRecord> {
        let records = self.guard.filter(requester, self.controller.records());
        debug!(requester = %requester, count = records.len(), "Listed workloads");
        records
    }

    pub async fn storage_info(&self, requester: &Requester) -> OrchestratorResult<StorageUsage> {
        self.traced("storage_info", requester, None, async {
            self.controller
                .storage()
                .usage(requester.as_str())
                .await
                .map_err(OrchestratorError::from)
        })
        .await
    }

    /// Registered capability ids, sorted
    pub fn capabilities(&self) -> Vec<String> {
        self.controller.validator().registry().ids()
    }

    pub fn pending_cleanup(&self) -> Vec<PendingCleanup> {
        self.controller.pending_cleanup()
    }

    /// Retry every queued storage cleanup, each under its name's lock
    ///
    /// Names whose lock is busy past the lock timeout are left for the
    /// next pass.
    pub async fn retry_pending_cleanup(&self) -> CleanupReport {
        let pending = self.controller.pending_cleanup();
        let attempts = pending.iter().map(|entry| async move {
            let _lease = match self.locks.acquire(&entry.name).await {
                Ok(lease) => lease,
                Err(e) => {
                    warn!(workload = %entry.name, error = %e, "Skipping cleanup; name busy");
                    return false;
                }
            };
            match self.controller.retry_cleanup(&entry.owner, &entry.name).await {
                Ok(()) => true,
                Err(e) => {
                    debug!(workload = %entry.name, error = %e, "Cleanup still failing");
                    false
                }
            }
        });
        let released = join_all(attempts).await.into_iter().filter(|ok| *ok).count();

        let report = CleanupReport {
            attempted: pending.len(),
            released,
            remaining: self.controller.pending_cleanup().len(),
        };
        if report.attempted > 0 {
            info!(attempted = report.attempted, released = report.released, remaining = report.remaining, "Storage cleanup pass");
        }
        report
    }

    /// Abort background work; records stay as they are
    pub fn shutdown(&self) {
        self.controller.shutdown();
    }
}
