/*!
 * API Module
 * JSON-lines control interface over the orchestrator
 */

pub mod handlers;
pub mod server;
pub mod types;

// Re-export for convenience
pub use handlers::{ApiHandler, SessionHistory};
pub use server::ControlServer;
pub use types::{ApiError, ApiRequest, ApiResponse, HistoryEntry, Operation};
