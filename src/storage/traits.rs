/*!
 * Volume Manager Trait
 * Narrow interface over the external volume manager
 */

use super::types::{Quota, VolumeUsage};
use crate::core::StorageError;
use async_trait::async_trait;
use std::path::Path;

/// External volume manager
///
/// Both mutating calls must be safe against the target already being in
/// the requested state.
#[async_trait]
pub trait VolumeManager: Send + Sync {
    /// Create-or-verify `dataset` mounted at `mountpoint`
    ///
    /// "Already exists" is success. When `quota` is given it is applied on
    /// every call, so configuration changes reach existing datasets.
    async fn ensure(
        &self,
        dataset: &str,
        mountpoint: &Path,
        quota: Option<Quota>,
    ) -> Result<(), StorageError>;

    /// Destroy `dataset` (and its children when `recursive`); absent is success
    async fn destroy(&self, dataset: &str, recursive: bool) -> Result<(), StorageError>;

    async fn exists(&self, dataset: &str) -> Result<bool, StorageError>;

    /// Usage of the dataset subtree; `None` when the dataset does not exist
    async fn usage(&self, dataset: &str) -> Result<Option<VolumeUsage>, StorageError>;
}
