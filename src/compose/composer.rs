/*!
 * Composer
 * Eager merge of baseline, capability and extra fragments
 *
 * Every fragment is read and checked here, so a broken capability surfaces
 * as a `CompositionFailed` error before the builder is ever invoked.
 */

use super::descriptor::*;
use crate::core::limits::{NAME_TAG, OWNER_TAG, TUN_DEVICE, WORKSPACE_MOUNT_POINT};
use crate::core::{AuthToken, BuildError};
use crate::registry::FragmentSource;
use crate::validation::ValidSpec;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Optional additions to a composed descriptor
#[derive(Debug, Clone, Default)]
pub struct ComposeExtras {
    /// Host path bound to the in-workload workspace mount point
    pub storage_path: Option<PathBuf>,
    /// Mesh auth token; grants the tunnel device and adds the identity fragment
    pub network_auth_token: Option<AuthToken>,
}

/// Builds descriptors from validated specs
#[derive(Debug, Clone)]
pub struct Composer {
    autostart: bool,
}

impl Composer {
    pub fn new() -> Self {
        Self { autostart: true }
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn compose(&self, valid: &ValidSpec, extras: &ComposeExtras) -> Result<Descriptor, BuildError> {
        let name = valid.name();
        let mut fragments = Vec::with_capacity(valid.descriptors.len() + 3);

        fragments.push(Fragment {
            kind: FragmentKind::Baseline,
            id: "baseline".to_string(),
            content: baseline_fragment(name, valid.owner()),
            sensitive: false,
        });

        for descriptor in &valid.descriptors {
            let content = match &descriptor.fragment {
                FragmentSource::Inline(text) => text.clone(),
                FragmentSource::File(path) => fs::read_to_string(path).map_err(|e| {
                    BuildError::composition(
                        name,
                        Some(descriptor.id.clone()),
                        format!("Fragment '{}' is unreadable: {}", descriptor.id, e),
                    )
                })?,
            };
            if content.trim().is_empty() {
                return Err(BuildError::composition(
                    name,
                    Some(descriptor.id.clone()),
                    format!("Fragment '{}' is empty", descriptor.id),
                ));
            }
            fragments.push(Fragment {
                kind: FragmentKind::Capability,
                id: descriptor.id.clone(),
                content,
                sensitive: false,
            });
        }

        let mut bind_mounts = Vec::new();
        if let Some(path) = &extras.storage_path {
            if !path.is_absolute() {
                return Err(BuildError::composition(
                    name,
                    None,
                    format!("Storage path '{}' is not absolute", path.display()),
                ));
            }
            fragments.push(Fragment {
                kind: FragmentKind::StorageMount,
                id: "storage-mount".to_string(),
                content: format!(
                    "bindMounts.{} = {{ hostPath = {}; isReadOnly = false; }};",
                    quote(WORKSPACE_MOUNT_POINT),
                    quote(&path.to_string_lossy())
                ),
                sensitive: false,
            });
            bind_mounts.push(BindMount {
                host_path: path.clone(),
                mount_point: WORKSPACE_MOUNT_POINT.to_string(),
                read_only: false,
            });
        }

        let auth_token = extras.network_auth_token.clone().filter(|t| !t.is_empty());
        let mut allowed_devices = Vec::new();
        if let Some(token) = &auth_token {
            fragments.push(Fragment {
                kind: FragmentKind::NetworkIdentity,
                id: "network-identity".to_string(),
                content: format!(
                    "mesh = {{ enable = true; hostname = {}; authKey = {}; }};",
                    quote(name),
                    quote(token.expose())
                ),
                sensitive: true,
            });
            allowed_devices.push(AllowedDevice {
                node: TUN_DEVICE.to_string(),
                modifier: "rwm".to_string(),
            });
        }

        debug!(
            workload = name,
            fragments = fragments.len(),
            storage = extras.storage_path.is_some(),
            network = auth_token.is_some(),
            "Descriptor composed"
        );

        Ok(Descriptor {
            name: name.to_string(),
            owner: valid.owner().to_string(),
            isolation: true,
            autostart: self.autostart,
            bind_mounts,
            allowed_devices,
            fragments,
            capabilities: valid.spec.capabilities.clone(),
            auth_token,
        })
    }
}

impl Default for Composer {
    fn default() -> Self {
        Self::new()
    }
}

fn baseline_fragment(name: &str, owner: &str) -> String {
    format!(
        "privateNetwork = true;\nenvironment.variables.{} = {};\nenvironment.variables.{} = {};",
        OWNER_TAG,
        quote(owner),
        NAME_TAG,
        quote(name)
    )
}
