/*!
 * Network Identity
 * Mesh enrollment and deregistration for workloads
 */

pub mod manager;
pub mod simulation;
pub mod tailscale;
pub mod traits;

pub use manager::{EnrollmentResult, NetworkIdentityManager};
pub use simulation::{SimEnrollment, SimulatedMesh};
pub use tailscale::TailscaleCli;
pub use traits::{MeshFailure, MeshNetwork, MeshPeer};
