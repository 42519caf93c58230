/*!
 * Security Module
 * Ownership checks and per-name serialization for every entry point
 */

pub mod locks;
pub mod ownership;

pub use locks::{LockManager, NameLease};
pub use ownership::OwnershipGuard;
