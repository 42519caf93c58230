/*!
 * Storage Lifecycle Manager
 * Per-owner roots, per-workload workspaces and their teardown
 *
 * Layout under the pool:
 *   <pool>/users/<owner>                              owner root, quota here
 *   <pool>/users/<owner>/containers/<name>            workload root
 *   <pool>/users/<owner>/containers/<name>/workspace  bind-mounted workspace
 */

use super::traits::VolumeManager;
use super::types::*;
use crate::core::{RetryError, RetryPolicy, StorageError, StorageErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Deterministic dataset names and mount paths for (owner, name)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pool: String,
    mount_root: PathBuf,
}

impl StorageLayout {
    pub fn new(pool: impl Into<String>, mount_root: impl Into<PathBuf>) -> Self {
        Self {
            pool: pool.into(),
            mount_root: mount_root.into(),
        }
    }

    fn mount_of(&self, dataset: &str) -> PathBuf {
        self.mount_root.join(dataset)
    }

    pub fn owner_root(&self, owner: &str) -> String {
        format!("{}/users/{}", self.pool, owner)
    }

    pub fn containers_root(&self, owner: &str) -> String {
        format!("{}/containers", self.owner_root(owner))
    }

    pub fn workload_root(&self, owner: &str, name: &str) -> String {
        format!("{}/{}", self.containers_root(owner), name)
    }

    pub fn workspace(&self, owner: &str, name: &str) -> String {
        format!("{}/workspace", self.workload_root(owner, name))
    }

    /// Host path of the workspace; what the workload bind-mounts
    pub fn workspace_path(&self, owner: &str, name: &str) -> PathBuf {
        self.mount_of(&self.workspace(owner, name))
    }
}

/// Drives the volume manager for workload storage
#[derive(Clone)]
pub struct StorageManager {
    volumes: Arc<dyn VolumeManager>,
    layout: StorageLayout,
    owner_quota: Quota,
    destroy_retry: RetryPolicy,
}

impl StorageManager {
    pub fn new(volumes: Arc<dyn VolumeManager>, layout: StorageLayout, owner_quota: Quota) -> Self {
        Self {
            volumes,
            layout,
            owner_quota,
            destroy_retry: RetryPolicy::storage_destroy(),
        }
    }

    pub fn with_destroy_retry(mut self, policy: RetryPolicy) -> Self {
        self.destroy_retry = policy;
        self
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn owner_quota(&self) -> Quota {
        self.owner_quota
    }

    /// Create-or-verify the owner's root and refresh its quota
    pub async fn ensure_owner_root(&self, owner: &str) -> Result<String, StorageError> {
        let root = self.layout.owner_root(owner);
        self.volumes
            .ensure(&root, &self.layout.mount_of(&root), Some(self.owner_quota))
            .await?;
        Ok(root)
    }

    /// Ensure the owner root, then the workload's workspace
    ///
    /// A new workspace is refused with `QuotaExceeded` when the owner root
    /// already has no space left. Re-ensuring an existing workspace is
    /// always allowed.
    pub async fn ensure_workload_storage(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<StorageDataset, StorageError> {
        let owner_root = self.ensure_owner_root(owner).await?;
        let workspace = self.layout.workspace(owner, name);

        if !self.volumes.exists(&workspace).await? {
            if let Some(usage) = self.volumes.usage(&owner_root).await? {
                if usage.quota.is_some() && usage.available == 0 {
                    warn!(owner, workload = name, used = usage.used, "Owner quota exhausted");
                    return Err(StorageError::new(
                        StorageErrorKind::QuotaExceeded,
                        &owner_root,
                        format!(
                            "Owner '{}' has no storage left ({} used of {})",
                            owner,
                            human_size(usage.used),
                            self.owner_quota
                        ),
                    ));
                }
            }
        }

        for dataset in [
            self.layout.containers_root(owner),
            self.layout.workload_root(owner, name),
            workspace.clone(),
        ] {
            self.volumes
                .ensure(&dataset, &self.layout.mount_of(&dataset), None)
                .await?;
        }

        let path = self.layout.workspace_path(owner, name);
        info!(owner, workload = name, path = %path.display(), "Workload storage ready");
        Ok(StorageDataset {
            dataset: workspace,
            path,
            owner_root,
            quota: self.owner_quota,
        })
    }

    /// Recursively destroy the workload root; absent storage is success
    ///
    /// Failures are retried per the destroy policy before escalating.
    pub async fn destroy_workload_storage(&self, owner: &str, name: &str) -> Result<(), StorageError> {
        let dataset = self.layout.workload_root(owner, name);
        let volumes = &self.volumes;
        let result = self
            .destroy_retry
            .run(
                |attempt| {
                    let dataset = dataset.clone();
                    async move {
                        let result = volumes.destroy(&dataset, true).await;
                        if let Err(e) = &result {
                            warn!(dataset = %dataset, attempt, error = %e, "Dataset destroy failed");
                        }
                        result
                    }
                },
                |_| true,
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(RetryError::Exhausted { attempts, last }) => Err(StorageError {
                kind: StorageErrorKind::DestroyFailed,
                message: format!("{} (gave up after {} attempts)", last.message, attempts),
                ..last
            }),
            Err(RetryError::Fatal(e)) => Err(e),
        }
    }

    pub async fn workload_storage_exists(&self, owner: &str, name: &str) -> Result<bool, StorageError> {
        self.volumes.exists(&self.layout.workload_root(owner, name)).await
    }

    /// Owner storage report; an owner with no root yet reports zero usage
    pub async fn usage(&self, owner: &str) -> Result<StorageUsage, StorageError> {
        let root = self.layout.owner_root(owner);
        let usage = self.volumes.usage(&root).await?.unwrap_or(VolumeUsage {
            quota: self.owner_quota.bytes(),
            used: 0,
            available: self.owner_quota.bytes().unwrap_or(0),
        });
        Ok(StorageUsage::from_volume(owner, usage))
    }

    /// Usage of one workload's storage against the owner's shared quota;
    /// `None` when the workload has no storage
    pub async fn workload_usage(&self, owner: &str, name: &str) -> Result<Option<StorageUsage>, StorageError> {
        let root = self.layout.workload_root(owner, name);
        let usage = self.volumes.usage(&root).await?.map(|usage| VolumeUsage {
            quota: self.owner_quota.bytes(),
            ..usage
        });
        Ok(usage.map(|usage| StorageUsage::from_volume(owner, usage)))
    }

    pub fn workspace_path(&self, owner: &str, name: &str) -> PathBuf {
        self.layout.workspace_path(owner, name)
    }

    pub fn mount_root(&self) -> &Path {
        &self.layout.mount_root
    }
}
