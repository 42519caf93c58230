/*!
 * Registry Types
 * Capability descriptors and scan errors
 */

use miette::Diagnostic;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Registry construction result
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Where a capability's configuration fragment lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum FragmentSource {
    /// Fragment text held in memory
    Inline(String),
    /// Fragment file discovered by the startup scan; read at composition time
    File(PathBuf),
}

/// A named, reusable configuration fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityDescriptor {
    pub id: String,
    pub fragment: FragmentSource,
}

impl CapabilityDescriptor {
    pub fn inline(id: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fragment: FragmentSource::Inline(fragment.into()),
        }
    }

    pub fn file(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            fragment: FragmentSource::File(path.into()),
        }
    }
}

#[derive(Error, Debug, Diagnostic)]
pub enum RegistryError {
    #[error("Capability source '{path}' is unreadable: {message}")]
    #[diagnostic(
        code(registry::unreadable),
        help("Check ORCH_CAPABILITY_DIR and its permissions.")
    )]
    Unreadable { path: PathBuf, message: String },

    #[error("Capability '{id}' is defined twice ({first} and {second})")]
    #[diagnostic(code(registry::duplicate))]
    Duplicate {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },
}
