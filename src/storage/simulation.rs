/*!
 * Simulated Volume Manager
 * In-memory dataset tree with quota accounting and failure injection
 */

use super::traits::VolumeManager;
use super::types::{Quota, VolumeUsage};
use crate::core::{StorageError, StorageErrorKind};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Volume operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeOp {
    Ensure,
    Destroy,
    Exists,
    Usage,
}

#[derive(Debug, Clone)]
struct SimVolume {
    mountpoint: PathBuf,
    quota: Option<u64>,
    /// Bytes written directly into this dataset
    written: u64,
}

/// In-memory dataset hierarchy
///
/// Usage of a dataset is the sum of what was written to it and to every
/// descendant; quotas apply to the whole subtree.
#[derive(Clone)]
pub struct SimulatedVolumes {
    volumes: Arc<DashMap<String, SimVolume>>,
    failures: Arc<DashMap<VolumeOp, (StorageErrorKind, u32)>>,
    /// Failures scoped to one dataset; checked before `failures`
    targeted: Arc<DashMap<(VolumeOp, String), (StorageErrorKind, u32)>>,
    capacity: u64,
}

impl SimulatedVolumes {
    pub fn new() -> Self {
        info!("Volume manager initialized (simulation mode)");
        Self {
            volumes: Arc::new(DashMap::new()),
            failures: Arc::new(DashMap::new()),
            targeted: Arc::new(DashMap::new()),
            capacity: 1 << 40,
        }
    }

    /// Fail the next `times` calls of `op` with `kind`
    pub fn fail_next(&self, op: VolumeOp, kind: StorageErrorKind, times: u32) {
        self.failures.insert(op, (kind, times));
    }

    /// Fail the next `times` calls of `op` on exactly `dataset`
    pub fn fail_dataset(&self, op: VolumeOp, dataset: &str, kind: StorageErrorKind, times: u32) {
        self.targeted.insert((op, dataset.to_string()), (kind, times));
    }

    fn injected(&self, op: VolumeOp, dataset: &str) -> Result<(), StorageError> {
        let key = (op, dataset.to_string());
        let kind = match take_failure(&self.targeted, &key) {
            Some(kind) => Some(kind),
            None => take_failure(&self.failures, &op),
        };
        match kind {
            Some(kind) => Err(StorageError::new(kind, dataset, format!("injected {:?} failure", op))
                .with_diagnostics("simulated volume manager failure")),
            None => Ok(()),
        }
    }

    fn subtree_used(&self, dataset: &str) -> u64 {
        let prefix = format!("{}/", dataset);
        self.volumes
            .iter()
            .filter(|e| e.key() == dataset || e.key().starts_with(&prefix))
            .map(|e| e.value().written)
            .sum()
    }

    fn ancestors(dataset: &str) -> impl Iterator<Item = &str> {
        dataset
            .char_indices()
            .filter(|(_, c)| *c == '/')
            .map(move |(i, _)| &dataset[..i])
            .chain(std::iter::once(dataset))
    }

    /// Headroom left in `dataset` considering every quota above it
    fn headroom(&self, dataset: &str) -> u64 {
        let mut headroom = self.capacity.saturating_sub(self.total_used());
        for ancestor in Self::ancestors(dataset) {
            let quota = self.volumes.get(ancestor).and_then(|v| v.quota);
            if let Some(quota) = quota {
                headroom = headroom.min(quota.saturating_sub(self.subtree_used(ancestor)));
            }
        }
        headroom
    }

    fn total_used(&self) -> u64 {
        self.volumes.iter().map(|e| e.value().written).sum()
    }

    /// Simulate a workload writing `bytes` into `dataset`; refused over quota
    pub fn write(&self, dataset: &str, bytes: u64) -> Result<(), StorageError> {
        if !self.volumes.contains_key(dataset) {
            return Err(StorageError::new(
                StorageErrorKind::QueryFailed,
                dataset,
                "dataset does not exist",
            ));
        }
        if bytes > self.headroom(dataset) {
            return Err(StorageError::new(
                StorageErrorKind::QuotaExceeded,
                dataset,
                "disk quota exceeded",
            ));
        }
        if let Some(mut volume) = self.volumes.get_mut(dataset) {
            volume.written += bytes;
        }
        Ok(())
    }

    pub fn contains(&self, dataset: &str) -> bool {
        self.volumes.contains_key(dataset)
    }

    pub fn mountpoint(&self, dataset: &str) -> Option<PathBuf> {
        self.volumes.get(dataset).map(|v| v.mountpoint.clone())
    }

    pub fn quota_of(&self, dataset: &str) -> Option<u64> {
        self.volumes.get(dataset).and_then(|v| v.quota)
    }

    /// Every dataset name, sorted
    pub fn datasets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.volumes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn used(&self, dataset: &str) -> u64 {
        self.subtree_used(dataset)
    }
}

/// Consume one armed failure under `key`, dropping the entry once spent
fn take_failure<K>(failures: &DashMap<K, (StorageErrorKind, u32)>, key: &K) -> Option<StorageErrorKind>
where
    K: Eq + std::hash::Hash,
{
    let mut exhausted = false;
    let kind = failures.get_mut(key).map(|mut entry| {
        entry.1 = entry.1.saturating_sub(1);
        exhausted = entry.1 == 0;
        entry.0
    });
    if exhausted {
        failures.remove(key);
    }
    kind
}

impl Default for SimulatedVolumes {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolumeManager for SimulatedVolumes {
    async fn ensure(
        &self,
        dataset: &str,
        mountpoint: &Path,
        quota: Option<Quota>,
    ) -> Result<(), StorageError> {
        self.injected(VolumeOp::Ensure, dataset)?;
        let mut volume = self
            .volumes
            .entry(dataset.to_string())
            .or_insert_with(|| SimVolume {
                mountpoint: mountpoint.to_path_buf(),
                quota: None,
                written: 0,
            });
        volume.mountpoint = mountpoint.to_path_buf();
        if let Some(quota) = quota {
            volume.quota = quota.bytes();
        }
        Ok(())
    }

    async fn destroy(&self, dataset: &str, recursive: bool) -> Result<(), StorageError> {
        self.injected(VolumeOp::Destroy, dataset)?;
        let prefix = format!("{}/", dataset);
        let has_children = self.volumes.iter().any(|e| e.key().starts_with(&prefix));
        if has_children && !recursive {
            return Err(StorageError::new(
                StorageErrorKind::DestroyFailed,
                dataset,
                "filesystem has children",
            ));
        }
        self.volumes
            .retain(|name, _| name != dataset && !name.starts_with(&prefix));
        Ok(())
    }

    async fn exists(&self, dataset: &str) -> Result<bool, StorageError> {
        self.injected(VolumeOp::Exists, dataset)?;
        Ok(self.volumes.contains_key(dataset))
    }

    async fn usage(&self, dataset: &str) -> Result<Option<VolumeUsage>, StorageError> {
        self.injected(VolumeOp::Usage, dataset)?;
        if !self.volumes.contains_key(dataset) {
            return Ok(None);
        }
        Ok(Some(VolumeUsage {
            quota: self.quota_of(dataset),
            used: self.subtree_used(dataset),
            available: self.headroom(dataset),
        }))
    }
}
