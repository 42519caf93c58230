/*!
 * Request Handlers
 * Dispatch of control operations onto the orchestrator
 */

use super::types::{ApiError, ApiRequest, ApiResponse, HistoryEntry, Operation};
use crate::core::{OrchestratorResult, Requester, TtlStore};
use crate::orchestrator::Orchestrator;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;

/// Per-requester recent operations
pub type SessionHistory = TtlStore<String, HistoryEntry>;

#[derive(Clone)]
pub struct ApiHandler {
    orchestrator: Arc<Orchestrator>,
    history: SessionHistory,
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::internal(format!("could not encode result: {}", e)))
}

fn encode<T: Serialize>(result: OrchestratorResult<T>) -> Result<Value, ApiError> {
    match result {
        Ok(value) => to_value(&value),
        Err(e) => Err(ApiError::from(&e)),
    }
}

impl ApiHandler {
    pub fn new(orchestrator: Arc<Orchestrator>, history: SessionHistory) -> Self {
        Self { orchestrator, history }
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        let id = request.id;
        let op = request.operation.as_str();
        let workload = request.operation.workload().map(str::to_string);
        let requester = request
            .requester
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(Requester::new);

        let result = match (&requester, request.operation) {
            (_, Operation::Capabilities) => to_value(&self.orchestrator.capabilities()),
            (None, _) => Err(ApiError::invalid_request("'requester' is required")),
            (Some(requester), operation) => self.dispatch(requester, operation).await,
        };

        if let Some(requester) = &requester {
            if op != "history" {
                self.history.append(
                    requester.to_string(),
                    HistoryEntry {
                        op: op.to_string(),
                        workload,
                        ok: result.is_ok(),
                        at: OffsetDateTime::now_utc(),
                    },
                );
            }
        }

        match result {
            Ok(value) => ApiResponse::success(id, value),
            Err(error) => ApiResponse::failure(id, error),
        }
    }

    async fn dispatch(&self, requester: &Requester, operation: Operation) -> Result<Value, ApiError> {
        let orch = &self.orchestrator;
        match operation {
            Operation::Create { spec } => encode(orch.create(requester, spec).await),
            Operation::Start { name } => encode(orch.start(requester, &name).await),
            Operation::Stop { name } => encode(orch.stop(requester, &name).await),
            Operation::Destroy { name } => encode(orch.destroy(requester, &name).await),
            Operation::Reconcile { name } => encode(orch.reconcile(requester, &name).await),
            Operation::Status { name } => encode(orch.status(requester, &name).await),
            Operation::Inspect { name } => encode(orch.inspect(requester, &name).await),
            Operation::Logs { name, lines } => encode(orch.logs(requester, &name, lines).await),
            Operation::List => to_value(&orch.list(requester)),
            Operation::StorageInfo => encode(orch.storage_info(requester).await),
            Operation::History => to_value(&self.history.get(&requester.to_string())),
            Operation::Capabilities => to_value(&orch.capabilities()),
        }
    }
}
