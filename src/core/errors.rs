/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 *
 * Every family carries enough structure (kind, workload, stage) to produce a
 * concise user-visible summary. Captured tool output rides along in
 * `diagnostics` for logging and is never serialized to callers.
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for guarded lifecycle operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Lifecycle stage an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Ownership,
    Lock,
    Storage,
    Composition,
    Build,
    Start,
    Stop,
    Teardown,
    StorageCleanup,
    Enrollment,
    Query,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Validation => "validation",
            Stage::Ownership => "ownership",
            Stage::Lock => "lock",
            Stage::Storage => "storage",
            Stage::Composition => "composition",
            Stage::Build => "build",
            Stage::Start => "start",
            Stage::Stop => "stop",
            Stage::Teardown => "teardown",
            Stage::StorageCleanup => "storage_cleanup",
            Stage::Enrollment => "enrollment",
            Stage::Query => "query",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    MissingField,
    InvalidName,
    InvalidOwner,
    UnknownCapability,
    DuplicateCapability,
    NameInUse,
}

/// Request rejected before any side effect
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[error("{message}")]
#[diagnostic(
    code(validation::rejected),
    help("Fix the request; nothing was created.")
)]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub field: String,
    /// Every offending value found, not only the first
    pub offending: Vec<String>,
    pub message: String,
}

impl ValidationError {
    pub fn missing_field(field: &str) -> Self {
        Self {
            kind: ValidationKind::MissingField,
            field: field.to_string(),
            offending: vec![],
            message: format!("Required field '{}' is missing or empty", field),
        }
    }

    pub fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::InvalidName,
            field: "name".to_string(),
            offending: vec![name.to_string()],
            message: reason.into(),
        }
    }

    pub fn invalid_owner(owner: &str, reason: impl Into<String>) -> Self {
        Self {
            kind: ValidationKind::InvalidOwner,
            field: "owner".to_string(),
            offending: vec![owner.to_string()],
            message: reason.into(),
        }
    }

    pub fn unknown_capabilities(ids: Vec<String>) -> Self {
        let message = format!("Unknown capabilities: {}", ids.join(", "));
        Self {
            kind: ValidationKind::UnknownCapability,
            field: "capabilities".to_string(),
            offending: ids,
            message,
        }
    }

    pub fn duplicate_capabilities(ids: Vec<String>) -> Self {
        let message = format!("Duplicate capabilities: {}", ids.join(", "));
        Self {
            kind: ValidationKind::DuplicateCapability,
            field: "capabilities".to_string(),
            offending: ids,
            message,
        }
    }

    pub fn name_in_use(name: &str) -> Self {
        Self {
            kind: ValidationKind::NameInUse,
            field: "name".to_string(),
            offending: vec![name.to_string()],
            message: format!("Workload name '{}' is already in use", name),
        }
    }
}

// =============================================================================
// OWNERSHIP
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum OwnershipError {
    #[error("Workload '{workload}' does not belong to '{requester}'")]
    #[diagnostic(
        code(ownership::not_owner),
        help("Only the owner of a workload may operate on it.")
    )]
    NotOwner { workload: String, requester: String },
}

// =============================================================================
// STORAGE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorKind {
    QuotaExceeded,
    CreateFailed,
    DestroyFailed,
    QueryFailed,
    TimedOut,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[error("Storage operation on '{dataset}' failed ({kind:?}): {message}")]
#[diagnostic(
    code(storage::failed),
    help("Check pool health and the owner's quota.")
)]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub dataset: String,
    pub message: String,
    #[serde(skip)]
    pub diagnostics: Option<String>,
    #[serde(skip)]
    pub timed_out_after: Option<Duration>,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, dataset: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            dataset: dataset.into(),
            message: message.into(),
            diagnostics: None,
            timed_out_after: None,
        }
    }

    pub fn timed_out(dataset: impl Into<String>, after: Duration) -> Self {
        let mut err = Self::new(
            StorageErrorKind::TimedOut,
            dataset,
            format!("volume manager did not answer within {}ms", after.as_millis()),
        );
        err.timed_out_after = Some(after);
        err
    }

    pub fn with_diagnostics(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if !output.is_empty() {
            self.diagnostics = Some(output);
        }
        self
    }
}

// =============================================================================
// BUILD
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildErrorKind {
    CompositionFailed,
    BuilderInvocationFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[error("Build of '{workload}' failed ({kind:?}): {message}")]
#[diagnostic(code(build::failed))]
pub struct BuildError {
    pub kind: BuildErrorKind,
    pub workload: String,
    /// Capability fragment implicated in the failure, when known
    pub fragment: Option<String>,
    pub message: String,
    #[serde(skip)]
    pub diagnostics: Option<String>,
}

impl BuildError {
    pub fn composition(workload: &str, fragment: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind: BuildErrorKind::CompositionFailed,
            workload: workload.to_string(),
            fragment,
            message: message.into(),
            diagnostics: None,
        }
    }

    pub fn invocation(workload: &str, message: impl Into<String>) -> Self {
        Self {
            kind: BuildErrorKind::BuilderInvocationFailed,
            workload: workload.to_string(),
            fragment: None,
            message: message.into(),
            diagnostics: None,
        }
    }
}

// =============================================================================
// RUNTIME
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeErrorKind {
    StartFailed,
    StopFailed,
    DestroyFailed,
    QueryFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[error("Runtime operation on '{workload}' failed ({kind:?}): {message}")]
#[diagnostic(code(runtime::failed))]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub workload: String,
    pub message: String,
    #[serde(skip)]
    pub diagnostics: Option<String>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, workload: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            workload: workload.to_string(),
            message: message.into(),
            diagnostics: None,
        }
    }
}

// =============================================================================
// NETWORK
// =============================================================================

/// Enrollment failure; recorded on the workload, never fatal to its lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[error("Mesh enrollment of '{workload}' failed after {attempts} attempt(s): {message}")]
#[diagnostic(code(network::enrollment_failed))]
pub struct NetworkEnrollmentError {
    pub workload: String,
    pub attempts: u32,
    pub message: String,
}

// =============================================================================
// CONCURRENCY
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConcurrencyError {
    #[error("Timed out after {waited_ms}ms waiting for the lock on '{workload}'")]
    #[diagnostic(
        code(concurrency::lock_timeout),
        help("Another operation on this workload is still running. Retry later.")
    )]
    LockTimeout { workload: String, waited_ms: u64 },
}

// =============================================================================
// UMBRELLA
// =============================================================================

/// Any failure surfaced by a guarded lifecycle operation
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum OrchestratorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ownership(#[from] OwnershipError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error("'{workload}' timed out during {stage} after {after_ms}ms; the operation may still complete, reconcile before retrying")]
    #[diagnostic(code(orchestrator::timeout))]
    Timeout {
        workload: String,
        stage: Stage,
        after_ms: u64,
    },

    #[error("Workload '{workload}' not found")]
    #[diagnostic(code(orchestrator::not_found))]
    NotFound { workload: String },

    #[error("Workload '{workload}' cannot move from {from} to {to}")]
    #[diagnostic(code(orchestrator::invalid_transition))]
    InvalidTransition {
        workload: String,
        from: crate::core::types::WorkloadState,
        to: crate::core::types::WorkloadState,
    },
}

impl OrchestratorError {
    /// Short machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation_error",
            OrchestratorError::Ownership(_) => "ownership_error",
            OrchestratorError::Storage(_) => "storage_error",
            OrchestratorError::Build(_) => "build_error",
            OrchestratorError::Runtime(_) => "runtime_error",
            OrchestratorError::Concurrency(_) => "concurrency_error",
            OrchestratorError::Timeout { .. } => "timeout_error",
            OrchestratorError::NotFound { .. } => "not_found",
            OrchestratorError::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Stage the error was raised in
    pub fn stage(&self) -> Stage {
        match self {
            OrchestratorError::Validation(_) => Stage::Validation,
            OrchestratorError::Ownership(_) => Stage::Ownership,
            OrchestratorError::Storage(e) => match e.kind {
                StorageErrorKind::DestroyFailed => Stage::StorageCleanup,
                _ => Stage::Storage,
            },
            OrchestratorError::Build(e) => match e.kind {
                BuildErrorKind::CompositionFailed => Stage::Composition,
                BuildErrorKind::BuilderInvocationFailed => Stage::Build,
            },
            OrchestratorError::Runtime(e) => match e.kind {
                RuntimeErrorKind::StartFailed => Stage::Start,
                RuntimeErrorKind::StopFailed => Stage::Stop,
                RuntimeErrorKind::DestroyFailed => Stage::Teardown,
                RuntimeErrorKind::QueryFailed => Stage::Query,
            },
            OrchestratorError::Concurrency(_) => Stage::Lock,
            OrchestratorError::Timeout { stage, .. } => *stage,
            OrchestratorError::NotFound { .. } => Stage::Query,
            OrchestratorError::InvalidTransition { .. } => Stage::Validation,
        }
    }

    /// Workload the error refers to, when the error itself knows it
    pub fn workload(&self) -> Option<&str> {
        match self {
            OrchestratorError::Validation(e) if e.field == "name" => {
                e.offending.first().map(|s| s.as_str())
            }
            OrchestratorError::Validation(_) => None,
            OrchestratorError::Ownership(OwnershipError::NotOwner { workload, .. }) => Some(workload),
            OrchestratorError::Storage(_) => None,
            OrchestratorError::Build(e) => Some(&e.workload),
            OrchestratorError::Runtime(e) => Some(&e.workload),
            OrchestratorError::Concurrency(ConcurrencyError::LockTimeout { workload, .. }) => {
                Some(workload)
            }
            OrchestratorError::Timeout { workload, .. }
            | OrchestratorError::NotFound { workload }
            | OrchestratorError::InvalidTransition { workload, .. } => Some(workload),
        }
    }

    /// Captured external tool output, for logs only
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            OrchestratorError::Storage(e) => e.diagnostics.as_deref(),
            OrchestratorError::Build(e) => e.diagnostics.as_deref(),
            OrchestratorError::Runtime(e) => e.diagnostics.as_deref(),
            _ => None,
        }
    }

    /// Concise structured summary suitable for the caller
    pub fn summary(&self) -> ErrorSummary {
        ErrorSummary {
            kind: self.kind().to_string(),
            workload: self.workload().map(str::to_string),
            stage: self.stage(),
            message: self.to_string(),
        }
    }
}

/// User-visible failure summary: kind, workload, failing stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub kind: String,
    pub workload: Option<String>,
    pub stage: Stage,
    pub message: String,
}

impl ErrorSummary {
    pub fn with_workload(mut self, workload: &str) -> Self {
        if self.workload.is_none() {
            self.workload = Some(workload.to_string());
        }
        self
    }
}
