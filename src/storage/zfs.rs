/*!
 * ZFS Volume Manager
 * `VolumeManager` over the zfs CLI
 */

use super::traits::VolumeManager;
use super::types::{Quota, VolumeUsage};
use crate::core::{StorageError, StorageErrorKind, TimeoutConfig, TimeoutPolicy};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

const ZFS: &str = "zfs";

pub struct ZfsVolumeManager {
    runner: Arc<dyn CommandRunner>,
    timeouts: TimeoutConfig,
}

impl ZfsVolumeManager {
    pub fn new(runner: Arc<dyn CommandRunner>, timeouts: TimeoutConfig) -> Self {
        Self { runner, timeouts }
    }

    async fn zfs(
        &self,
        dataset: &str,
        kind: StorageErrorKind,
        timeout: TimeoutPolicy,
        args: &[&str],
    ) -> Result<CommandOutput, StorageError> {
        let spec = CommandSpec::new(ZFS)
            .args(args.iter().copied())
            .timeout(timeout);
        let output = self.runner.run(spec).await.map_err(|e| {
            StorageError::new(kind, dataset, format!("could not run zfs: {}", e))
        })?;
        if output.timed_out {
            return Err(StorageError::timed_out(
                dataset,
                timeout.duration().unwrap_or(output.duration),
            ));
        }
        Ok(output)
    }

    fn failed(kind: StorageErrorKind, dataset: &str, what: &str, output: &CommandOutput) -> StorageError {
        error!(
            dataset,
            status = ?output.status,
            stderr = %output.error_text(),
            "zfs {} failed",
            what
        );
        StorageError::new(kind, dataset, format!("zfs {} failed", what))
            .with_diagnostics(output.combined())
    }
}

fn is_absent(output: &CommandOutput) -> bool {
    output.mentions("does not exist") || output.mentions("dataset not found")
}

/// Parse `zfs get -Hp -o property,value quota,used,available` output
fn parse_usage(stdout: &str) -> VolumeUsage {
    let mut usage = VolumeUsage::default();
    for line in stdout.lines() {
        let Some((property, value)) = line.split_once('\t') else {
            continue;
        };
        let value = value.trim().parse::<u64>().ok();
        match property.trim() {
            // -p prints 0 for an unset quota
            "quota" => usage.quota = value.filter(|q| *q > 0),
            "used" => usage.used = value.unwrap_or(0),
            "available" => usage.available = value.unwrap_or(0),
            _ => {}
        }
    }
    usage
}

#[async_trait]
impl VolumeManager for ZfsVolumeManager {
    async fn ensure(
        &self,
        dataset: &str,
        mountpoint: &Path,
        quota: Option<Quota>,
    ) -> Result<(), StorageError> {
        let mountpoint_opt = format!("mountpoint={}", mountpoint.display());
        let create = self
            .zfs(
                dataset,
                StorageErrorKind::CreateFailed,
                self.timeouts.storage_mutation,
                &["create", "-o", &mountpoint_opt, dataset],
            )
            .await?;

        if create.success() {
            info!(dataset, mountpoint = %mountpoint.display(), "Created dataset");
        } else if create.mentions("already exists") {
            debug!(dataset, "Dataset already exists");
            // Keeps datasets created with a legacy mountpoint reachable
            let set = self
                .zfs(
                    dataset,
                    StorageErrorKind::CreateFailed,
                    self.timeouts.storage,
                    &["set", &mountpoint_opt, dataset],
                )
                .await?;
            if !set.success() {
                return Err(Self::failed(StorageErrorKind::CreateFailed, dataset, "set mountpoint", &set));
            }
        } else if create.mentions("out of space") || create.mentions("quota exceeded") {
            return Err(Self::failed(StorageErrorKind::QuotaExceeded, dataset, "create", &create));
        } else {
            return Err(Self::failed(StorageErrorKind::CreateFailed, dataset, "create", &create));
        }

        if let Some(quota) = quota {
            let quota_opt = format!("quota={}", quota);
            let set = self
                .zfs(
                    dataset,
                    StorageErrorKind::CreateFailed,
                    self.timeouts.storage,
                    &["set", &quota_opt, dataset],
                )
                .await?;
            if !set.success() {
                return Err(Self::failed(StorageErrorKind::CreateFailed, dataset, "set quota", &set));
            }
            debug!(dataset, %quota, "Quota applied");
        }
        Ok(())
    }

    async fn destroy(&self, dataset: &str, recursive: bool) -> Result<(), StorageError> {
        let mut args = vec!["destroy"];
        if recursive {
            args.push("-r");
        }
        args.push(dataset);
        let output = self
            .zfs(dataset, StorageErrorKind::DestroyFailed, self.timeouts.storage_mutation, &args)
            .await?;

        if output.success() {
            info!(dataset, recursive, "Destroyed dataset");
            Ok(())
        } else if is_absent(&output) {
            debug!(dataset, "Dataset already absent");
            Ok(())
        } else {
            Err(Self::failed(StorageErrorKind::DestroyFailed, dataset, "destroy", &output))
        }
    }

    async fn exists(&self, dataset: &str) -> Result<bool, StorageError> {
        let output = self
            .zfs(
                dataset,
                StorageErrorKind::QueryFailed,
                self.timeouts.storage,
                &["list", "-H", "-o", "name", dataset],
            )
            .await?;
        if output.success() {
            Ok(true)
        } else if is_absent(&output) {
            Ok(false)
        } else {
            Err(Self::failed(StorageErrorKind::QueryFailed, dataset, "list", &output))
        }
    }

    async fn usage(&self, dataset: &str) -> Result<Option<VolumeUsage>, StorageError> {
        let output = self
            .zfs(
                dataset,
                StorageErrorKind::QueryFailed,
                self.timeouts.storage,
                &["get", "-Hp", "-o", "property,value", "quota,used,available", dataset],
            )
            .await?;
        if output.success() {
            Ok(Some(parse_usage(&output.stdout)))
        } else if is_absent(&output) {
            Ok(None)
        } else {
            Err(Self::failed(StorageErrorKind::QueryFailed, dataset, "get", &output))
        }
    }
}
