/*!
 * Mesh Network Trait
 */

use crate::core::AuthToken;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// The workload's node as the mesh sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeshPeer {
    pub hostname: String,
    /// Mesh addresses, IPv4 first
    pub addresses: Vec<String>,
    pub online: bool,
}

/// Failure of a single mesh service call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshFailure {
    pub message: String,
    /// Worth another attempt (timeouts, transient service errors)
    pub retryable: bool,
    pub timed_out: bool,
    pub diagnostics: Option<String>,
}

impl MeshFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            timed_out: false,
            diagnostics: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::transient(message)
        }
    }

    pub fn timeout(after_ms: u64) -> Self {
        Self {
            timed_out: true,
            ..Self::transient(format!("mesh service did not answer within {}ms", after_ms))
        }
    }

    pub fn with_diagnostics(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if !output.is_empty() {
            self.diagnostics = Some(output);
        }
        self
    }
}

impl fmt::Display for MeshFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// External mesh network coordination service
#[async_trait]
pub trait MeshNetwork: Send + Sync {
    /// Enroll the workload's identity
    ///
    /// With `reset`, any local enrollment state left from an earlier
    /// workload of the same name is discarded first.
    async fn enroll(
        &self,
        workload: &str,
        hostname_hint: &str,
        token: &AuthToken,
        reset: bool,
    ) -> Result<(), MeshFailure>;

    /// Remove the workload's identity from the mesh
    async fn deregister(&self, workload: &str) -> Result<(), MeshFailure>;

    /// Current node of the workload; `None` when it is not logged in
    async fn peer(&self, workload: &str) -> Result<Option<MeshPeer>, MeshFailure>;
}
