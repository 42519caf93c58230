/*!
 * Network Identity Manager
 * Detached, supervised mesh enrollment per workload
 *
 * Enrollment runs in a background task with bounded retries so it never
 * delays a workload becoming ready. Each enrollment is stamped with a
 * generation; only the current generation of a name may report back, so a
 * task outliving its workload cannot overwrite the state of a recreated one.
 */

use super::traits::{MeshFailure, MeshNetwork, MeshPeer};
use crate::core::{AuthToken, NetworkEnrollmentError, RetryPolicy, TimeoutPolicy};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome delivered to the enrollment callback: attempts used, or the failure
pub type EnrollmentResult = Result<u32, NetworkEnrollmentError>;

#[derive(Clone)]
pub struct NetworkIdentityManager {
    mesh: Arc<dyn MeshNetwork>,
    retry: RetryPolicy,
    attempt_timeout: TimeoutPolicy,
    deregister_timeout: TimeoutPolicy,
    /// Latest generation per name; kept after deregistration so a
    /// recreated workload enrolls with a reset
    generations: Arc<DashMap<String, u64>>,
    tasks: Arc<DashMap<String, (u64, JoinHandle<()>)>>,
    next_generation: Arc<AtomicU64>,
}

impl NetworkIdentityManager {
    pub fn new(mesh: Arc<dyn MeshNetwork>) -> Self {
        Self {
            mesh,
            retry: RetryPolicy::enrollment(),
            attempt_timeout: TimeoutPolicy::None,
            deregister_timeout: TimeoutPolicy::None,
            generations: Arc::new(DashMap::new()),
            tasks: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeouts(mut self, attempt: TimeoutPolicy, deregister: TimeoutPolicy) -> Self {
        self.attempt_timeout = attempt;
        self.deregister_timeout = deregister;
        self
    }

    /// Start a background enrollment and return its generation
    ///
    /// Any in-flight enrollment for `workload` is aborted. If the name was
    /// enrolled before, the mesh call is told to reset stale state.
    /// `on_complete` runs once, only if this enrollment is still current.
    pub fn enroll<F>(&self, workload: &str, hostname_hint: &str, token: AuthToken, on_complete: F) -> u64
    where
        F: FnOnce(EnrollmentResult) + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let reset = self
            .generations
            .insert(workload.to_string(), generation)
            .is_some();
        if let Some((_, (stale, handle))) = self.tasks.remove(workload) {
            debug!(workload, generation = stale, "Aborting superseded enrollment");
            handle.abort();
        }

        let mesh = Arc::clone(&self.mesh);
        let retry = self.retry;
        let timeout = self.attempt_timeout;
        let generations = Arc::clone(&self.generations);
        let tasks = Arc::clone(&self.tasks);
        let name = workload.to_string();
        let hint = hostname_hint.to_string();

        let handle = tokio::spawn(async move {
            let attempts_made = AtomicU32::new(0);
            let (mesh_ref, name_ref, hint_ref, token_ref, counter) =
                (&mesh, &name, &hint, &token, &attempts_made);
            let result = retry
                .run(
                    move |attempt| async move {
                        counter.store(attempt, Ordering::SeqCst);
                        debug!(workload = %name_ref, attempt, reset, "Enrolling in mesh");
                        match timeout
                            .run(mesh_ref.enroll(name_ref, hint_ref, token_ref, reset))
                            .await
                        {
                            Ok(result) => result,
                            Err(after) => Err(MeshFailure::timeout(after.as_millis() as u64)),
                        }
                    },
                    |failure: &MeshFailure| failure.retryable,
                )
                .await;

            let attempts = attempts_made.load(Ordering::SeqCst);
            let outcome = match result {
                Ok(()) => Ok(attempts),
                Err(e) => {
                    let failure = e.into_inner();
                    if let Some(diagnostics) = &failure.diagnostics {
                        debug!(workload = %name, %diagnostics, "Mesh client output");
                    }
                    Err(NetworkEnrollmentError {
                        workload: name.clone(),
                        attempts,
                        message: failure.message,
                    })
                }
            };

            let current = generations.get(&name).map(|g| *g) == Some(generation);
            if !current {
                debug!(workload = %name, generation, "Enrollment superseded; result dropped");
            } else {
                match &outcome {
                    Ok(_) => info!(workload = %name, "Mesh enrollment complete"),
                    Err(e) => warn!(workload = %name, attempts = e.attempts, error = %e.message, "Mesh enrollment failed"),
                }
                on_complete(outcome);
            }
            tasks.remove_if(&name, |_, (g, _)| *g == generation);
        });

        self.tasks.insert(workload.to_string(), (generation, handle));
        generation
    }

    /// Best-effort removal of the workload's identity
    ///
    /// Aborts any in-flight enrollment. Failure is logged by the caller and
    /// never blocks teardown.
    pub async fn deregister(&self, workload: &str) -> Result<(), MeshFailure> {
        if let Some((_, (generation, handle))) = self.tasks.remove(workload) {
            debug!(workload, generation, "Aborting in-flight enrollment");
            handle.abort();
        }
        // Invalidate any callback that raced the abort
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.generations.insert(workload.to_string(), generation);

        match self.deregister_timeout.run(self.mesh.deregister(workload)).await {
            Ok(result) => result,
            Err(after) => Err(MeshFailure::timeout(after.as_millis() as u64)),
        }
    }

    /// The workload's mesh node, bounded by the deregistration timeout
    pub async fn peer(&self, workload: &str) -> Result<Option<MeshPeer>, MeshFailure> {
        match self.deregister_timeout.run(self.mesh.peer(workload)).await {
            Ok(result) => result,
            Err(after) => Err(MeshFailure::timeout(after.as_millis() as u64)),
        }
    }

    /// Wait for the in-flight enrollment of `workload`, if any
    pub async fn settle(&self, workload: &str) {
        if let Some((_, (_, handle))) = self.tasks.remove(workload) {
            let _ = handle.await;
        }
    }

    pub fn in_flight(&self, workload: &str) -> bool {
        self.tasks
            .get(workload)
            .map(|entry| !entry.1.is_finished())
            .unwrap_or(false)
    }

    pub fn current_generation(&self, workload: &str) -> Option<u64> {
        self.generations.get(workload).map(|g| *g)
    }

    /// Abort every in-flight enrollment
    pub fn shutdown(&self) {
        let names: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, (_, handle))) = self.tasks.remove(&name) {
                handle.abort();
            }
        }
    }
}
