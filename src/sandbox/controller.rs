/*!
 * Workload Controller
 * Drives workloads through their state machine with rollback on failure
 *
 * The controller owns every `WorkloadRecord`. Callers are expected to hold
 * the per-name lock and to have passed the ownership check; the controller
 * itself only enforces the state machine and the ordering of side effects.
 *
 * Rollback rules:
 * - build-stage failure: nothing was installed, storage is destroyed
 * - start-stage failure: the sandbox is torn down first; storage is
 *   destroyed only if that teardown succeeded
 * - timeout: nothing is undone, the record stays in `Provisioning`
 *   until `reconcile` observes what actually happened
 * - teardown failure on destroy: storage is never touched
 */

use super::inspection::{Facet, WorkloadInspection, WorkloadLogs};
use super::traits::{InstanceStatus, RuntimeFailure, RuntimeStage, SandboxRuntime};
use crate::compose::{ComposeExtras, Composer};
use crate::core::{
    AuthToken, EnrollmentState, ErrorSummary, NetworkIdentity, OrchestratorError,
    OrchestratorResult, RuntimeError, RuntimeErrorKind, Stage, StorageError, StorageErrorKind,
    ValidationError, WorkloadRecord, WorkloadState,
};
use crate::network::NetworkIdentityManager;
use crate::storage::StorageManager;
use crate::validation::{SpecValidator, WorkloadRequest};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Storage whose destroy failed and awaits out-of-band cleanup
#[derive(Debug, Clone, Serialize)]
pub struct PendingCleanup {
    pub owner: String,
    pub name: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Result of a destroy that removed the workload
#[derive(Debug, Clone, Serialize)]
pub struct DestroyOutcome {
    pub name: String,
    pub owner: String,
    /// Mesh identity removed, or there was none
    pub network_released: bool,
    pub storage_released: bool,
    /// Set when storage cleanup failed and was queued for retry
    pub storage_cleanup: Option<ErrorSummary>,
}

/// Tally of one pass over the cleanup queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub attempted: usize,
    pub released: usize,
    pub remaining: usize,
}

pub struct WorkloadController {
    records: Arc<DashMap<String, WorkloadRecord>>,
    validator: SpecValidator,
    composer: Composer,
    storage: StorageManager,
    network: NetworkIdentityManager,
    runtime: Arc<dyn SandboxRuntime>,
    /// Keyed by workload root dataset, so a reused name cannot collide
    cleanup: DashMap<String, PendingCleanup>,
}

fn not_found(name: &str) -> OrchestratorError {
    OrchestratorError::NotFound {
        workload: name.to_string(),
    }
}

/// Caller-facing form of a storage failure; timeouts become `Timeout`
fn storage_failure(err: StorageError, workload: &str) -> OrchestratorError {
    if let Some(diagnostics) = &err.diagnostics {
        error!(workload, dataset = %err.dataset, %diagnostics, "Volume manager output");
    }
    match (err.kind, err.timed_out_after) {
        (StorageErrorKind::TimedOut, Some(after)) => OrchestratorError::Timeout {
            workload: workload.to_string(),
            stage: Stage::Storage,
            after_ms: after.as_millis() as u64,
        },
        _ => err.into(),
    }
}

impl WorkloadController {
    pub fn new(
        validator: SpecValidator,
        storage: StorageManager,
        network: NetworkIdentityManager,
        runtime: Arc<dyn SandboxRuntime>,
    ) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            validator,
            composer: Composer::new(),
            storage,
            network,
            runtime,
            cleanup: DashMap::new(),
        }
    }

    pub fn with_composer(mut self, composer: Composer) -> Self {
        self.composer = composer;
        self
    }

    pub fn validator(&self) -> &SpecValidator {
        &self.validator
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn network(&self) -> &NetworkIdentityManager {
        &self.network
    }

    pub fn get(&self, name: &str) -> Option<WorkloadRecord> {
        self.records.get(name).map(|r| r.value().clone())
    }

    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.records.get(name).map(|r| r.owner.clone())
    }

    /// Every record, sorted by name
    pub fn records(&self) -> Vec<WorkloadRecord> {
        let mut records: Vec<WorkloadRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Queued storage cleanups, sorted by owner then name
    pub fn pending_cleanup(&self) -> Vec<PendingCleanup> {
        let mut pending: Vec<PendingCleanup> = self.cleanup.iter().map(|e| e.value().clone()).collect();
        pending.sort_by(|a, b| (&a.owner, &a.name).cmp(&(&b.owner, &b.name)));
        pending
    }

    fn require(&self, name: &str) -> OrchestratorResult<WorkloadRecord> {
        self.get(name).ok_or_else(|| not_found(name))
    }

    fn transition(&self, name: &str, to: WorkloadState) -> OrchestratorResult<()> {
        let mut record = self.records.get_mut(name).ok_or_else(|| not_found(name))?;
        let from = record.state;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(OrchestratorError::InvalidTransition {
                workload: name.to_string(),
                from,
                to,
            });
        }
        record.state = to;
        info!(workload = name, %from, %to, "State transition");
        Ok(())
    }

    fn mark_failed(&self, name: &str, err: &OrchestratorError) {
        if let Err(e) = self.transition(name, WorkloadState::Failed) {
            warn!(workload = name, error = %e, "Could not mark workload failed");
            return;
        }
        if let Some(mut record) = self.records.get_mut(name) {
            record.failure = Some(err.summary().with_workload(name));
        }
    }

    fn runtime_failure(&self, name: &str, failure: RuntimeFailure) -> OrchestratorError {
        if let Some(diagnostics) = &failure.diagnostics {
            error!(workload = name, stage = ?failure.stage, %diagnostics, "Runtime output");
        }
        failure.into_error(name)
    }

    /// Best-effort removal of the workload's storage during a failed create
    async fn roll_back_storage(&self, owner: &str, name: &str) {
        match self.storage.destroy_workload_storage(owner, name).await {
            Ok(()) => {
                if let Some(mut record) = self.records.get_mut(name) {
                    record.storage_path = None;
                }
                info!(owner, workload = name, "Storage rolled back");
            }
            Err(e) => {
                warn!(owner, workload = name, error = %e, "Storage rollback failed; kept on the failed record");
            }
        }
    }

    /// Remove whatever part of the workload root a failed ensure left
    /// behind; the record is about to go, so a failure is queued instead
    async fn discard_partial_storage(&self, owner: &str, name: &str) {
        if let Err(e) = self.storage.destroy_workload_storage(owner, name).await {
            self.queue_cleanup(owner, name, &e);
        }
    }

    /// Tear down a sandbox that was installed but never came up; storage
    /// is released only once the sandbox is gone
    async fn abandon_installed(&self, owner: &str, name: &str) {
        match self.runtime.destroy(name).await {
            Ok(()) => self.roll_back_storage(owner, name).await,
            Err(failure) => {
                warn!(workload = name, error = %failure, "Teardown after failed start failed; storage preserved");
            }
        }
    }

    /// Finish a queued cleanup for this owner and name before reusing it
    async fn clear_stale_cleanup(&self, owner: &str, name: &str) -> OrchestratorResult<()> {
        let key = self.storage.layout().workload_root(owner, name);
        if !self.cleanup.contains_key(&key) {
            return Ok(());
        }
        debug!(owner, workload = name, "Clearing queued storage cleanup before create");
        self.retry_cleanup_entry(&key)
            .await
            .map_err(|e| storage_failure(e, name))
    }

    fn queue_cleanup(&self, owner: &str, name: &str, err: &StorageError) {
        let key = self.storage.layout().workload_root(owner, name);
        let mut entry = self.cleanup.entry(key).or_insert_with(|| PendingCleanup {
            owner: owner.to_string(),
            name: name.to_string(),
            attempts: 0,
            last_error: String::new(),
        });
        entry.attempts += 1;
        entry.last_error = err.message.clone();
        warn!(owner, workload = name, error = %err, "Storage cleanup queued");
    }

    fn begin_enrollment(&self, name: &str, hint: &str, token: AuthToken) {
        let records = Arc::clone(&self.records);
        let workload = name.to_string();
        self.network.enroll(name, hint, token, move |result| {
            let Some(mut record) = records.get_mut(&workload) else {
                return;
            };
            if let Some(identity) = record.network_identity.as_mut() {
                match result {
                    Ok(_) => {
                        identity.enrollment_state = EnrollmentState::Enrolled;
                        identity.last_error = None;
                    }
                    Err(e) => {
                        identity.enrollment_state = EnrollmentState::Failed;
                        identity.last_error = Some(e.to_string());
                    }
                }
            }
        });
    }

    /// Validate, provision storage, compose, materialize, then enroll
    pub async fn create(&self, request: &WorkloadRequest) -> OrchestratorResult<WorkloadRecord> {
        let valid = self.validator.validate(request)?;
        let name = valid.name().to_string();
        let owner = valid.owner().to_string();

        if let Some(existing) = self.get(&name) {
            if existing.state == WorkloadState::Failed && existing.owner == owner {
                info!(workload = %name, "Replacing failed workload");
                self.records.remove(&name);
            } else {
                return Err(ValidationError::name_in_use(&name).into());
            }
        }
        self.clear_stale_cleanup(&owner, &name).await?;

        let mut record = WorkloadRecord::new(&name, &owner, valid.spec.capabilities.clone());
        if valid.spec.wants_storage {
            record.storage_path = Some(self.storage.workspace_path(&owner, &name));
        }
        if let Some(token) = &valid.auth_token {
            record.network_identity = Some(NetworkIdentity::pending(&name, token.clone()));
        }
        self.records.insert(name.clone(), record);
        self.transition(&name, WorkloadState::Provisioning)?;

        let storage_path = if valid.spec.wants_storage {
            match self.storage.ensure_workload_storage(&owner, &name).await {
                Ok(dataset) => Some(dataset.path),
                Err(e) => {
                    let timed_out = e.kind == StorageErrorKind::TimedOut;
                    let err = storage_failure(e, &name);
                    if !timed_out {
                        self.discard_partial_storage(&owner, &name).await;
                        self.records.remove(&name);
                    }
                    return Err(err);
                }
            }
        } else {
            None
        };

        let extras = ComposeExtras {
            storage_path,
            network_auth_token: valid.auth_token.clone(),
        };
        let descriptor = match self.composer.compose(&valid, &extras) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                let err = OrchestratorError::from(e);
                error!(workload = %name, error = %err, "Composition failed");
                self.roll_back_storage(&owner, &name).await;
                self.mark_failed(&name, &err);
                return Err(err);
            }
        };

        if let Err(failure) = self.runtime.materialize(&descriptor).await {
            let stage = failure.stage;
            let timed_out = failure.timed_out_after.is_some();
            let err = self.runtime_failure(&name, failure);
            if timed_out {
                warn!(workload = %name, stage = %err.stage(), "Create timed out; reconcile before retrying");
                return Err(err);
            }
            match stage {
                RuntimeStage::Start => self.abandon_installed(&owner, &name).await,
                _ => self.roll_back_storage(&owner, &name).await,
            }
            self.mark_failed(&name, &err);
            return Err(err);
        }

        self.transition(&name, WorkloadState::Running)?;
        if let Some(token) = valid.auth_token {
            self.begin_enrollment(&name, &name, token);
        }
        info!(workload = %name, owner = %owner, "Workload running");
        self.require(&name)
    }

    /// Start; an already running workload is a no-op success
    pub async fn start(&self, name: &str) -> OrchestratorResult<WorkloadRecord> {
        let record = self.require(name)?;
        if !matches!(record.state, WorkloadState::Running | WorkloadState::Stopped) {
            return Err(OrchestratorError::InvalidTransition {
                workload: name.to_string(),
                from: record.state,
                to: WorkloadState::Running,
            });
        }
        self.runtime
            .start(name)
            .await
            .map_err(|f| self.runtime_failure(name, f))?;
        self.transition(name, WorkloadState::Running)?;
        self.require(name)
    }

    /// Stop; an already stopped workload is a no-op success
    pub async fn stop(&self, name: &str) -> OrchestratorResult<WorkloadRecord> {
        let record = self.require(name)?;
        if !matches!(record.state, WorkloadState::Running | WorkloadState::Stopped) {
            return Err(OrchestratorError::InvalidTransition {
                workload: name.to_string(),
                from: record.state,
                to: WorkloadState::Stopped,
            });
        }
        self.runtime
            .stop(name)
            .await
            .map_err(|f| self.runtime_failure(name, f))?;
        self.transition(name, WorkloadState::Stopped)?;
        self.require(name)
    }

    /// Deregister, tear down, then release storage
    ///
    /// A teardown failure leaves the record in `Destroying` with storage
    /// intact. A storage failure after teardown still removes the record;
    /// the storage is queued for `retry_cleanup`.
    pub async fn destroy(&self, name: &str) -> OrchestratorResult<DestroyOutcome> {
        let record = self.require(name)?;
        self.transition(name, WorkloadState::Destroying)?;

        let network_released = match &record.network_identity {
            None => true,
            Some(_) => match self.network.deregister(name).await {
                Ok(()) => true,
                Err(failure) => {
                    warn!(workload = name, error = %failure, "Mesh deregistration failed; continuing teardown");
                    if let Some(diagnostics) = &failure.diagnostics {
                        debug!(workload = name, %diagnostics, "Mesh client output");
                    }
                    false
                }
            },
        };

        if let Err(failure) = self.runtime.destroy(name).await {
            let err = self.runtime_failure(name, failure);
            error!(workload = name, error = %err, "Teardown failed; storage kept");
            return Err(err);
        }

        let mut outcome = DestroyOutcome {
            name: name.to_string(),
            owner: record.owner.clone(),
            network_released,
            storage_released: false,
            storage_cleanup: None,
        };
        match self.storage.destroy_workload_storage(&record.owner, name).await {
            Ok(()) => outcome.storage_released = true,
            Err(e) => {
                self.queue_cleanup(&record.owner, name, &e);
                outcome.storage_cleanup = Some(OrchestratorError::from(e).summary().with_workload(name));
            }
        }

        self.transition(name, WorkloadState::Destroyed)?;
        self.records.remove(name);
        info!(workload = name, owner = %record.owner, storage_released = outcome.storage_released, "Workload destroyed");
        Ok(outcome)
    }

    /// Query the runtime and correct the record to match it
    pub async fn reconcile(&self, name: &str) -> OrchestratorResult<WorkloadRecord> {
        let record = self.require(name)?;
        let observed = self
            .runtime
            .status(name)
            .await
            .map_err(|f| self.runtime_failure(name, f))?;
        debug!(workload = name, state = %record.state, ?observed, "Reconciling");

        match (record.state, observed) {
            (WorkloadState::Provisioning, InstanceStatus::Running) => {
                self.transition(name, WorkloadState::Running)?;
                let pending = record
                    .network_identity
                    .filter(|id| id.enrollment_state == EnrollmentState::Pending);
                if let Some(identity) = pending {
                    if !self.network.in_flight(name) {
                        self.begin_enrollment(name, &identity.hostname_hint, identity.auth_token);
                    }
                }
            }
            (WorkloadState::Provisioning, InstanceStatus::Stopped) => {
                self.abandon_installed(&record.owner, name).await;
                let err = RuntimeError::new(RuntimeErrorKind::StartFailed, name, "sandbox was installed but never started");
                self.mark_failed(name, &OrchestratorError::from(err));
            }
            (WorkloadState::Provisioning, InstanceStatus::Absent) => {
                self.roll_back_storage(&record.owner, name).await;
                let err = RuntimeError::new(RuntimeErrorKind::StartFailed, name, "sandbox never appeared");
                self.mark_failed(name, &OrchestratorError::from(err));
            }
            (WorkloadState::Running, InstanceStatus::Stopped) => {
                self.transition(name, WorkloadState::Stopped)?;
            }
            (WorkloadState::Stopped, InstanceStatus::Running) => {
                self.transition(name, WorkloadState::Running)?;
            }
            (WorkloadState::Running | WorkloadState::Stopped, InstanceStatus::Absent) => {
                warn!(workload = name, "Sandbox disappeared");
                let err = RuntimeError::new(RuntimeErrorKind::QueryFailed, name, "sandbox disappeared from the runtime");
                self.mark_failed(name, &OrchestratorError::from(err));
            }
            _ => {}
        }
        self.require(name)
    }

    /// Query runtime, storage and mesh concurrently for a detail view
    ///
    /// A failing collaborator marks only its own facet unavailable.
    pub async fn inspect(&self, name: &str) -> OrchestratorResult<WorkloadInspection> {
        let record = self.require(name)?;

        let runtime = async {
            match self.runtime.status(name).await {
                Ok(status) => Facet::Observed(status),
                Err(failure) => {
                    debug!(workload = name, error = %failure, "Runtime facet unavailable");
                    Facet::Unavailable(failure.message)
                }
            }
        };
        let storage = async {
            if record.storage_path.is_none() {
                return Facet::NotApplicable;
            }
            match self.storage.workload_usage(&record.owner, name).await {
                Ok(Some(usage)) => Facet::Observed(usage),
                Ok(None) => Facet::Unavailable("workload storage is missing".to_string()),
                Err(e) => {
                    debug!(workload = name, error = %e, "Storage facet unavailable");
                    Facet::Unavailable(e.message)
                }
            }
        };
        let network = async {
            if record.network_identity.is_none() {
                return Facet::NotApplicable;
            }
            match self.network.peer(name).await {
                Ok(peer) => Facet::Observed(peer),
                Err(failure) => {
                    debug!(workload = name, error = %failure, "Network facet unavailable");
                    Facet::Unavailable(failure.message)
                }
            }
        };

        let (runtime, storage, network) = futures::join!(runtime, storage, network);
        Ok(WorkloadInspection {
            record,
            runtime,
            storage,
            network,
        })
    }

    /// The workload's most recent journal lines
    pub async fn logs(&self, name: &str, lines: usize) -> OrchestratorResult<WorkloadLogs> {
        self.require(name)?;
        let lines = self
            .runtime
            .logs(name, lines)
            .await
            .map_err(|f| self.runtime_failure(name, f))?;
        Ok(WorkloadLogs {
            name: name.to_string(),
            lines,
        })
    }

    async fn retry_cleanup_entry(&self, key: &str) -> Result<(), StorageError> {
        let Some(entry) = self.cleanup.get(key).map(|e| e.value().clone()) else {
            return Ok(());
        };
        match self.storage.destroy_workload_storage(&entry.owner, &entry.name).await {
            Ok(()) => {
                self.cleanup.remove(key);
                info!(owner = %entry.owner, workload = %entry.name, "Queued storage cleanup finished");
                Ok(())
            }
            Err(e) => {
                self.queue_cleanup(&entry.owner, &entry.name, &e);
                Err(e)
            }
        }
    }

    /// Retry the queued cleanup for one owner and name
    pub async fn retry_cleanup(&self, owner: &str, name: &str) -> Result<(), StorageError> {
        let key = self.storage.layout().workload_root(owner, name);
        self.retry_cleanup_entry(&key).await
    }

    /// Abort background enrollments
    pub fn shutdown(&self) {
        self.network.shutdown();
    }
}
