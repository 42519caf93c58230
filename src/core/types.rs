/*!
 * Core Types
 * Workload records and the identity types shared across subsystems
 */

use super::errors::ErrorSummary;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use time::OffsetDateTime;

/// Tenant identifier (opaque)
pub type OwnerId = String;

/// Workload name, unique across all owners
pub type WorkloadName = String;

/// Identity of the caller submitting an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Requester(pub OwnerId);

impl Requester {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a workload
///
/// ```text
/// Requested -> Provisioning -> Running <-> Stopped
///                     \-> Failed
/// (any) -> Destroying -> Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadState {
    Requested,
    Provisioning,
    Running,
    Stopped,
    Failed,
    Destroying,
    Destroyed,
}

impl WorkloadState {
    /// Check whether the state machine permits `self -> next`
    pub fn can_transition_to(self, next: WorkloadState) -> bool {
        use WorkloadState::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroying) => true,
            (Destroying, Destroyed) => true,
            (Requested, Provisioning) => true,
            (Provisioning, Running) | (Provisioning, Failed) => true,
            (Running, Stopped) | (Stopped, Running) => true,
            // Drift detected by reconciliation
            (Running, Failed) | (Stopped, Failed) => true,
            _ => false,
        }
    }

    /// Active records hold the name; only Destroyed releases it
    pub fn is_active(self) -> bool {
        !matches!(self, WorkloadState::Destroyed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadState::Requested => "requested",
            WorkloadState::Provisioning => "provisioning",
            WorkloadState::Running => "running",
            WorkloadState::Stopped => "stopped",
            WorkloadState::Failed => "failed",
            WorkloadState::Destroying => "destroying",
            WorkloadState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mesh network auth token
///
/// Never serialized and redacted from Debug/Display output.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Expose the raw token for handing to the mesh service
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("AuthToken(****)")
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("****")
    }
}

impl<'de> Deserialize<'de> for AuthToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(AuthToken)
    }
}

/// Enrollment progress of a workload's mesh identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    Pending,
    Enrolled,
    Failed,
}

/// A workload's mesh network identity
#[derive(Debug, Clone, Serialize)]
pub struct NetworkIdentity {
    pub hostname_hint: String,
    #[serde(skip)]
    pub auth_token: AuthToken,
    pub enrollment_state: EnrollmentState,
    /// Reason for the last failed enrollment, if any
    pub last_error: Option<String>,
}

impl NetworkIdentity {
    pub fn pending(hostname_hint: impl Into<String>, auth_token: AuthToken) -> Self {
        Self {
            hostname_hint: hostname_hint.into(),
            auth_token,
            enrollment_state: EnrollmentState::Pending,
            last_error: None,
        }
    }
}

/// Authoritative in-memory record of a workload
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadRecord {
    pub name: WorkloadName,
    pub owner: OwnerId,
    pub state: WorkloadState,
    pub capabilities: Vec<String>,
    pub storage_path: Option<PathBuf>,
    pub network_identity: Option<NetworkIdentity>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Summary of the failure that moved the record to `Failed`
    pub failure: Option<ErrorSummary>,
}

impl WorkloadRecord {
    pub fn new(name: impl Into<String>, owner: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            state: WorkloadState::Requested,
            capabilities,
            storage_path: None,
            network_identity: None,
            created_at: OffsetDateTime::now_utc(),
            failure: None,
        }
    }

    /// Running but without a working mesh identity
    pub fn is_degraded(&self) -> bool {
        self.network_identity
            .as_ref()
            .map(|id| id.enrollment_state == EnrollmentState::Failed)
            .unwrap_or(false)
    }

    pub fn enrollment_state(&self) -> Option<EnrollmentState> {
        self.network_identity.as_ref().map(|id| id.enrollment_state)
    }
}
