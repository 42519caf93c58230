/*!
 * Storage Lifecycle
 * Quota-bounded per-owner datasets and per-workload workspaces
 */

pub mod manager;
pub mod simulation;
pub mod traits;
pub mod types;
pub mod zfs;

pub use manager::{StorageLayout, StorageManager};
pub use simulation::{SimulatedVolumes, VolumeOp};
pub use traits::VolumeManager;
pub use types::{human_size, Quota, StorageDataset, StorageUsage, VolumeUsage};
pub use zfs::ZfsVolumeManager;
