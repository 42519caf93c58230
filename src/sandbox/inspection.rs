/*!
 * Workload Inspection
 * Detail view assembled from independent live queries
 *
 * Each facet is queried on its own; one collaborator failing leaves the
 * other facets intact and marks only its own facet unavailable.
 */

use super::traits::InstanceStatus;
use crate::core::{WorkloadRecord, WorkloadState};
use crate::network::MeshPeer;
use crate::storage::StorageUsage;
use serde::Serialize;

/// Outcome of one live query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "value")]
pub enum Facet<T> {
    Observed(T),
    /// The workload was not created with this feature
    NotApplicable,
    /// The query failed; the concise reason only
    Unavailable(String),
}

impl<T> Facet<T> {
    pub fn observed(&self) -> Option<&T> {
        match self {
            Facet::Observed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Facet::Unavailable(_))
    }
}

/// Live detail for one workload
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadInspection {
    /// Recorded state, capabilities and enrollment
    pub record: WorkloadRecord,
    pub runtime: Facet<InstanceStatus>,
    pub storage: Facet<StorageUsage>,
    /// `Observed(None)` when the workload is not logged in to the mesh
    pub network: Facet<Option<MeshPeer>>,
}

impl WorkloadInspection {
    /// Recorded state disagrees with what the runtime reports
    pub fn drifted(&self) -> bool {
        let expected = match self.record.state {
            WorkloadState::Running => InstanceStatus::Running,
            WorkloadState::Stopped => InstanceStatus::Stopped,
            _ => return false,
        };
        self.runtime.observed().is_some_and(|observed| *observed != expected)
    }
}

/// Recent journal lines for one workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadLogs {
    pub name: String,
    pub lines: Vec<String>,
}
