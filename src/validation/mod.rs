/*!
 * Spec Validation
 * Requests are validated in full before any side effect occurs
 */

pub mod types;
pub mod validator;

pub use types::{ValidSpec, WorkloadRequest, WorkloadSpec};
pub use validator::{validate_owner, validate_workload_name, SpecValidator};
