/*!
 * Workload Descriptor
 * Fully resolved input for the external builder
 */

use crate::core::AuthToken;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Origin of a composed fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Baseline,
    Capability,
    StorageMount,
    NetworkIdentity,
}

/// One configuration fragment in composition order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub kind: FragmentKind,
    /// Capability id for capability fragments, otherwise the fragment kind
    pub id: String,
    pub content: String,
    /// Content carries a secret and is masked in documents
    pub sensitive: bool,
}

impl Fragment {
    fn to_value(&self) -> Value {
        json!({
            "kind": self.kind,
            "id": self.id,
            "content": if self.sensitive { "****" } else { self.content.as_str() },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub mount_point: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowedDevice {
    pub node: String,
    /// cgroup device access modifier
    pub modifier: String,
}

/// Single composed descriptor for one workload
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub name: String,
    pub owner: String,
    /// Always on
    pub isolation: bool,
    pub autostart: bool,
    pub bind_mounts: Vec<BindMount>,
    pub allowed_devices: Vec<AllowedDevice>,
    pub fragments: Vec<Fragment>,
    /// Capability ids in composition order
    pub capabilities: Vec<String>,
    pub(crate) auth_token: Option<AuthToken>,
}

impl Descriptor {
    pub fn has_network_identity(&self) -> bool {
        self.auth_token.is_some()
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.bind_mounts.first().map(|m| m.host_path.as_path())
    }

    pub fn fragment_ids(&self) -> Vec<&str> {
        self.fragments.iter().map(|f| f.id.as_str()).collect()
    }

    /// Boundary document keyed by workload name; secrets are masked
    pub fn to_document(&self) -> Value {
        let body = json!({
            "owner": self.owner,
            "isolation": self.isolation,
            "autostart": self.autostart,
            "bind_mounts": self.bind_mounts,
            "allowed_devices": self.allowed_devices,
            "fragments": self.fragments.iter().map(Fragment::to_value).collect::<Vec<_>>(),
        });
        let mut document = serde_json::Map::new();
        document.insert(self.name.clone(), body);
        Value::Object(document)
    }

    /// Builder expression invoking `<flake_path>/nix/mkContainer.nix`
    ///
    /// Contains the raw auth token; write it only to a private temp file.
    pub fn render_expression(&self, flake_path: &Path) -> String {
        let entry = flake_path.join("nix").join("mkContainer.nix");
        let mut out = String::new();
        let _ = writeln!(out, "let");
        let _ = writeln!(out, "  mkContainer = import {};", entry.display());
        let _ = writeln!(out, "  spec = {{");
        let _ = writeln!(out, "    name = {};", quote(&self.name));
        let _ = writeln!(out, "    owner = {};", quote(&self.owner));
        let _ = writeln!(out, "    modules = {};", quote_list(&self.capabilities));
        if let Some(workspace) = self.workspace() {
            let _ = writeln!(out, "    workspace = {};", quote(&workspace.to_string_lossy()));
        }
        if let Some(token) = &self.auth_token {
            let _ = writeln!(out, "    tailscaleAuthKey = {};", quote(token.expose()));
        }
        let _ = writeln!(out, "  }};");
        let _ = writeln!(out, "in");
        let _ = writeln!(out, "  mkContainer spec");
        out
    }
}

/// Quote a value as a composition-language string literal
///
/// Backslash is escaped first so later escapes are not doubled.
pub fn quote(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$");
    format!("\"{}\"", escaped)
}

pub fn quote_list(items: &[String]) -> String {
    let mut out = String::from("[ ");
    for item in items {
        out.push_str(&quote(item));
        out.push(' ');
    }
    out.push(']');
    out
}
