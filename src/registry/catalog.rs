/*!
 * Capability Registry
 * Immutable id -> descriptor table built once at startup
 */

use super::types::*;
use crate::core::ValidationError;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Read-only capability table, shared without locking
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    descriptors: Arc<BTreeMap<String, CapabilityDescriptor>>,
}

impl CapabilityRegistry {
    /// Build the table by scanning `dir`
    ///
    /// Recognizes `<id>.<ext>` files and `<id>/default.<ext>` directories.
    /// Hidden entries are skipped. An unreadable directory is an error, not
    /// an empty registry.
    pub fn scan(dir: &Path, ext: &str) -> RegistryResult<Self> {
        let unreadable = |e: std::io::Error| RegistryError::Unreadable {
            path: dir.to_path_buf(),
            message: e.to_string(),
        };

        let suffix = format!(".{}", ext);
        let default_file = format!("default.{}", ext);
        let mut found: BTreeMap<String, CapabilityDescriptor> = BTreeMap::new();

        for entry in fs::read_dir(dir).map_err(unreadable)? {
            let entry = entry.map_err(unreadable)?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                debug!(entry = ?file_name, "Skipping non-UTF-8 capability entry");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            let path = entry.path();
            let file_type = entry.file_type().map_err(unreadable)?;
            let candidate = if file_type.is_dir() {
                let inner = path.join(&default_file);
                inner.is_file().then(|| (name.to_string(), inner))
            } else {
                name.strip_suffix(suffix.as_str())
                    .filter(|id| !id.is_empty())
                    .map(|id| (id.to_string(), path.clone()))
            };

            let Some((id, fragment_path)) = candidate else {
                continue;
            };
            if let Some(existing) = found.get(&id) {
                if let FragmentSource::File(first) = &existing.fragment {
                    return Err(RegistryError::Duplicate {
                        id,
                        first: first.clone(),
                        second: fragment_path,
                    });
                }
            }
            found.insert(id.clone(), CapabilityDescriptor::file(id, fragment_path));
        }

        info!(
            dir = %dir.display(),
            count = found.len(),
            "Capability registry loaded"
        );
        Ok(Self {
            descriptors: Arc::new(found),
        })
    }

    /// Build from an explicit descriptor list; later duplicates replace earlier ones
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = CapabilityDescriptor>) -> Self {
        let map = descriptors
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        Self {
            descriptors: Arc::new(map),
        }
    }

    /// Sorted capability ids
    pub fn ids(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<&CapabilityDescriptor> {
        self.descriptors.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.descriptors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Resolve ids to descriptors in the order supplied
    ///
    /// Fails if any id is unknown, reporting every unknown id at once.
    pub fn resolve(&self, ids: &[String]) -> Result<Vec<CapabilityDescriptor>, ValidationError> {
        let mut resolved = Vec::with_capacity(ids.len());
        let mut unknown = Vec::new();

        for id in ids {
            match self.descriptors.get(id) {
                Some(descriptor) => resolved.push(descriptor.clone()),
                None if !unknown.contains(id) => unknown.push(id.clone()),
                None => {}
            }
        }

        if unknown.is_empty() {
            Ok(resolved)
        } else {
            Err(ValidationError::unknown_capabilities(unknown))
        }
    }
}
