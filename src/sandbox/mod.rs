/*!
 * Sandbox Lifecycle
 * Runtime collaborators and the workload state machine
 */

pub mod container;
pub mod controller;
pub mod inspection;
pub mod simulation;
pub mod traits;

pub use container::ContainerRuntime;
pub use controller::{CleanupReport, DestroyOutcome, PendingCleanup, WorkloadController};
pub use inspection::{Facet, WorkloadInspection, WorkloadLogs};
pub use simulation::{RuntimeFault, RuntimeOp, SimulatedRuntime};
pub use traits::{InstanceStatus, RuntimeFailure, RuntimeStage, SandboxRuntime};
