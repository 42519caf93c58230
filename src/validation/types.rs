/*!
 * Request Types
 * Boundary request document and the validated spec produced from it
 */

use crate::core::{AuthToken, OwnerId, WorkloadName};
use crate::registry::CapabilityDescriptor;
use serde::Deserialize;

/// Workload request as received at the boundary
///
/// Every field is optional here so that absence is reported by the
/// validator as `MissingField` rather than as a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkloadRequest {
    pub name: Option<String>,
    pub owner: Option<String>,
    pub capabilities: Option<Vec<String>>,
    /// Request a persistent workspace
    pub wants_storage: bool,
    /// Workspace hint; presence also requests persistent storage.
    /// The mounted path is always derived from owner and name.
    pub workspace: Option<String>,
    /// Request a mesh network identity
    pub wants_network_identity: bool,
    /// Mesh auth token; presence also requests a network identity
    pub network_auth_token: Option<AuthToken>,
}

impl WorkloadRequest {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            owner: Some(owner.into()),
            capabilities: Some(Vec::new()),
            ..Default::default()
        }
    }

    pub fn with_capabilities<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_storage(mut self) -> Self {
        self.wants_storage = true;
        self
    }

    pub fn with_network_identity(mut self, token: Option<AuthToken>) -> Self {
        self.wants_network_identity = true;
        self.network_auth_token = token;
        self
    }

    pub(crate) fn storage_requested(&self) -> bool {
        self.wants_storage
            || self
                .workspace
                .as_deref()
                .map(|w| !w.trim().is_empty())
                .unwrap_or(false)
    }

    pub(crate) fn supplied_token(&self) -> Option<&AuthToken> {
        self.network_auth_token.as_ref().filter(|t| !t.is_empty())
    }
}

/// Accepted workload specification; immutable once produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub name: WorkloadName,
    pub owner: OwnerId,
    /// Ordered, duplicate-free capability ids
    pub capabilities: Vec<String>,
    pub wants_storage: bool,
    pub wants_network_identity: bool,
}

/// Output of successful validation: the spec plus everything it resolved to
#[derive(Debug, Clone)]
pub struct ValidSpec {
    pub spec: WorkloadSpec,
    /// Descriptors in the order the capabilities were requested
    pub descriptors: Vec<CapabilityDescriptor>,
    /// Present exactly when `spec.wants_network_identity`
    pub auth_token: Option<AuthToken>,
}

impl ValidSpec {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn owner(&self) -> &str {
        &self.spec.owner
    }
}
