/*!
 * API Types
 * Wire format of the JSON-lines control protocol
 */

use crate::core::{ErrorSummary, OrchestratorError, Stage};
use crate::validation::WorkloadRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use time::OffsetDateTime;

/// One request line
///
/// ```json
/// {"id": 1, "requester": "u1", "op": "start", "name": "dev1"}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRequest {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(flatten)]
    pub operation: Operation,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create { spec: WorkloadRequest },
    Start { name: String },
    Stop { name: String },
    Destroy { name: String },
    Reconcile { name: String },
    Status { name: String },
    Inspect { name: String },
    Logs {
        name: String,
        #[serde(default)]
        lines: Option<usize>,
    },
    List,
    StorageInfo,
    Capabilities,
    History,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::Start { .. } => "start",
            Operation::Stop { .. } => "stop",
            Operation::Destroy { .. } => "destroy",
            Operation::Reconcile { .. } => "reconcile",
            Operation::Status { .. } => "status",
            Operation::Inspect { .. } => "inspect",
            Operation::Logs { .. } => "logs",
            Operation::List => "list",
            Operation::StorageInfo => "storage_info",
            Operation::Capabilities => "capabilities",
            Operation::History => "history",
        }
    }

    /// Workload the operation addresses, if any
    pub fn workload(&self) -> Option<&str> {
        match self {
            Operation::Create { spec } => spec.name.as_deref(),
            Operation::Start { name }
            | Operation::Stop { name }
            | Operation::Destroy { name }
            | Operation::Reconcile { name }
            | Operation::Status { name }
            | Operation::Inspect { name }
            | Operation::Logs { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Caller-facing error; never carries raw tool output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

impl ApiError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: "invalid_request".to_string(),
            message: message.into(),
            workload: None,
            stage: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: "internal_error".to_string(),
            message: message.into(),
            workload: None,
            stage: None,
        }
    }
}

impl From<ErrorSummary> for ApiError {
    fn from(summary: ErrorSummary) -> Self {
        Self {
            kind: summary.kind,
            message: summary.message,
            workload: summary.workload,
            stage: Some(summary.stage),
        }
    }
}

impl From<&OrchestratorError> for ApiError {
    fn from(err: &OrchestratorError) -> Self {
        err.summary().into()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

/// One response line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    pub fn success(id: Option<u64>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<u64>, error: ApiError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Recent operation in a requester's session history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub op: String,
    pub workload: Option<String>,
    pub ok: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}
