/*!
 * Shared fixture: an orchestrator over simulated collaborators
 */

use std::sync::Arc;
use std::time::Duration;
use workload_orchestrator::core::{AuthToken, RetryPolicy, Requester, TimeoutPolicy};
use workload_orchestrator::network::{NetworkIdentityManager, SimulatedMesh};
use workload_orchestrator::registry::{CapabilityDescriptor, CapabilityRegistry};
use workload_orchestrator::sandbox::{SimulatedRuntime, WorkloadController};
use workload_orchestrator::security::LockManager;
use workload_orchestrator::storage::{Quota, SimulatedVolumes, StorageLayout, StorageManager};
use workload_orchestrator::validation::{SpecValidator, WorkloadRequest};
use workload_orchestrator::Orchestrator;

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub volumes: SimulatedVolumes,
    pub runtime: SimulatedRuntime,
    pub mesh: SimulatedMesh,
}

pub struct HarnessBuilder {
    quota: Quota,
    lock_timeout: Duration,
    default_token: Option<AuthToken>,
}

impl HarnessBuilder {
    pub fn quota(mut self, quota: Quota) -> Self {
        self.quota = quota;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn default_token(mut self, token: &str) -> Self {
        self.default_token = Some(AuthToken::new(token));
        self
    }

    pub fn build(self) -> Harness {
        let registry = CapabilityRegistry::from_descriptors([
            CapabilityDescriptor::inline("git", "{ programs.git.enable = true; }"),
            CapabilityDescriptor::inline("fish", "{ programs.fish.enable = true; }"),
            CapabilityDescriptor::inline("rust", "{ pkgs, ... }: { environment.systemPackages = [ pkgs.cargo ]; }"),
        ]);
        let volumes = SimulatedVolumes::new();
        let runtime = SimulatedRuntime::new();
        let mesh = SimulatedMesh::new();

        let storage = StorageManager::new(Arc::new(volumes.clone()), StorageLayout::new("tank", "/"), self.quota)
            .with_destroy_retry(RetryPolicy::immediate(2));
        let network = NetworkIdentityManager::new(Arc::new(mesh.clone())).with_retry(RetryPolicy::immediate(3));
        let validator = SpecValidator::new(registry).with_default_token(self.default_token);
        let controller = WorkloadController::new(validator, storage, network, Arc::new(runtime.clone()));
        let locks = LockManager::new(TimeoutPolicy::Lock(self.lock_timeout));

        Harness {
            orchestrator: Arc::new(Orchestrator::new(controller, locks)),
            volumes,
            runtime,
            mesh,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            quota: Quota::Bytes(10 << 30),
            lock_timeout: Duration::from_secs(30),
            default_token: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Wait for the background enrollment of `name`
    pub async fn settle(&self, name: &str) {
        self.orchestrator.controller().network().settle(name).await;
    }
}

pub fn user(id: &str) -> Requester {
    Requester::new(id)
}

/// Request with git and fish plus a persistent workspace
pub fn dev_request(name: &str, owner: &str) -> WorkloadRequest {
    WorkloadRequest::new(name, owner)
        .with_capabilities(["git", "fish"])
        .with_storage()
}

pub fn workspace_dataset(owner: &str, name: &str) -> String {
    format!("tank/users/{}/containers/{}/workspace", owner, name)
}

pub fn workload_dataset(owner: &str, name: &str) -> String {
    format!("tank/users/{}/containers/{}", owner, name)
}
