/*!
 * Capability Registry
 * Enumerates capability units and resolves ids to descriptors
 */

pub mod catalog;
pub mod types;

pub use catalog::CapabilityRegistry;
pub use types::{CapabilityDescriptor, FragmentSource, RegistryError, RegistryResult};
