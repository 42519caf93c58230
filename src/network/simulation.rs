/*!
 * Simulated Mesh Network
 * In-memory enrollment table with scripted failures and latency
 */

use super::traits::{MeshFailure, MeshNetwork, MeshPeer};
use crate::core::AuthToken;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimEnrollment {
    pub hostname: String,
    pub reset: bool,
    pub address: String,
}

#[derive(Clone, Default)]
pub struct SimulatedMesh {
    enrolled: Arc<DashMap<String, SimEnrollment>>,
    enroll_calls: Arc<DashMap<String, u32>>,
    enroll_failures: Arc<AtomicU32>,
    permanent_failure: Arc<Mutex<Option<String>>>,
    deregister_failures: Arc<AtomicU32>,
    peer_failures: Arc<AtomicU32>,
    next_address: Arc<AtomicU32>,
    latency: Arc<Mutex<Duration>>,
}

impl SimulatedMesh {
    pub fn new() -> Self {
        info!("Mesh network initialized (simulation mode)");
        Self::default()
    }

    /// Fail the next `times` enrollment attempts with a retryable error
    pub fn fail_enrollments(&self, times: u32) {
        self.enroll_failures.store(times, Ordering::SeqCst);
    }

    /// Reject every enrollment permanently (e.g. revoked key)
    pub fn reject_enrollments(&self, reason: impl Into<String>) {
        *self.permanent_failure.lock() = Some(reason.into());
    }

    pub fn fail_deregistrations(&self, times: u32) {
        self.deregister_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_peer_queries(&self, times: u32) {
        self.peer_failures.store(times, Ordering::SeqCst);
    }

    /// Delay every enrollment call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn is_enrolled(&self, workload: &str) -> bool {
        self.enrolled.contains_key(workload)
    }

    pub fn enrollment(&self, workload: &str) -> Option<SimEnrollment> {
        self.enrolled.get(workload).map(|e| e.value().clone())
    }

    pub fn enroll_attempts(&self, workload: &str) -> u32 {
        self.enroll_calls.get(workload).map(|c| *c).unwrap_or(0)
    }

    pub fn enrolled_count(&self) -> usize {
        self.enrolled.len()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MeshNetwork for SimulatedMesh {
    async fn enroll(
        &self,
        workload: &str,
        hostname_hint: &str,
        token: &AuthToken,
        reset: bool,
    ) -> Result<(), MeshFailure> {
        *self.enroll_calls.entry(workload.to_string()).or_insert(0) += 1;

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let rejected = self.permanent_failure.lock().clone();
        if let Some(reason) = rejected {
            return Err(MeshFailure::permanent(reason));
        }
        if Self::take_failure(&self.enroll_failures) {
            return Err(MeshFailure::transient("coordination server unavailable"));
        }
        if token.is_empty() {
            return Err(MeshFailure::permanent("empty auth key"));
        }

        let host = self.next_address.fetch_add(1, Ordering::SeqCst) + 1;
        self.enrolled.insert(
            workload.to_string(),
            SimEnrollment {
                hostname: hostname_hint.to_string(),
                reset,
                address: format!("100.64.{}.{}", host / 256, host % 256),
            },
        );
        Ok(())
    }

    async fn deregister(&self, workload: &str) -> Result<(), MeshFailure> {
        if Self::take_failure(&self.deregister_failures) {
            return Err(MeshFailure::transient("coordination server unavailable"));
        }
        self.enrolled.remove(workload);
        Ok(())
    }

    async fn peer(&self, workload: &str) -> Result<Option<MeshPeer>, MeshFailure> {
        if Self::take_failure(&self.peer_failures) {
            return Err(MeshFailure::transient("mesh client not responding"));
        }
        Ok(self.enrolled.get(workload).map(|e| MeshPeer {
            hostname: e.hostname.clone(),
            addresses: vec![e.address.clone()],
            online: true,
        }))
    }
}
