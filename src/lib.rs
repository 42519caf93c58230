/*!
 * Workload Orchestrator Library
 * Lifecycle orchestration for isolated per-user development sandboxes
 */

pub mod api;
pub mod compose;
pub mod core;
pub mod exec;
pub mod monitoring;
pub mod network;
pub mod orchestrator;
pub mod registry;
pub mod sandbox;
pub mod security;
pub mod storage;
pub mod validation;

// Re-exports
pub use api::ControlServer;
pub use crate::core::errors::*;
pub use crate::core::{Backend, OrchestratorConfig, Requester, WorkloadRecord, WorkloadState};
pub use monitoring::init_tracing;
pub use orchestrator::{Orchestrator, SimulationHandles};
pub use registry::CapabilityRegistry;
pub use validation::WorkloadRequest;
