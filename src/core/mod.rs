/*!
 * Core Module
 * Fundamental types, error handling, configuration and call policies
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod retry;
pub mod timeout;
pub mod ttl_store;
pub mod types;

// Re-export for convenience
pub use config::{Backend, ConfigError, OrchestratorConfig};
pub use errors::*;
pub use retry::{RetryError, RetryPolicy};
pub use timeout::{TimeoutConfig, TimeoutPolicy};
pub use ttl_store::TtlStore;
pub use types::*;
