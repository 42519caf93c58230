/*!
 * Orchestrator Configuration
 * Typed settings loaded from the environment with per-field defaults
 */

use super::limits::*;
use super::timeout::{TimeoutConfig, TimeoutPolicy};
use super::types::AuthToken;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value '{value}': {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Which collaborator implementations to wire in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Real CLI tools (builder, runtime, volume manager, mesh client)
    System,
    /// In-memory collaborators for development and demos
    Simulation,
}

/// Complete runtime configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Capability fragments scanned at startup
    pub capability_dir: PathBuf,
    /// Fragment file extension (without dot)
    pub capability_ext: String,
    /// Builder composition root
    pub flake_path: PathBuf,
    pub storage_pool: String,
    pub storage_mount_root: PathBuf,
    /// Per-owner quota in volume-manager notation (`10G`, `none`)
    pub owner_quota: String,
    /// Fallback mesh token for requests that want network identity without one
    pub mesh_auth_key: Option<AuthToken>,
    pub backend: Backend,
    pub timeouts: TimeoutConfig,
    pub listen_addr: SocketAddr,
    pub session_ttl: Duration,
}

impl OrchestratorConfig {
    /// Defaults for every field
    pub fn new() -> Self {
        Self {
            capability_dir: PathBuf::from("/var/lib/orchestrator/modules"),
            capability_ext: "nix".to_string(),
            flake_path: PathBuf::from("/var/lib/orchestrator"),
            storage_pool: DEFAULT_STORAGE_POOL.to_string(),
            storage_mount_root: PathBuf::from("/"),
            owner_quota: DEFAULT_OWNER_QUOTA.to_string(),
            mesh_auth_key: None,
            backend: Backend::System,
            timeouts: TimeoutConfig::new(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7171)),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Load from an explicit variable map (testable without touching the env)
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());
        let mut config = Self::new();

        if let Some(dir) = get("ORCH_CAPABILITY_DIR") {
            config.capability_dir = PathBuf::from(dir);
        }
        if let Some(ext) = get("ORCH_CAPABILITY_EXT") {
            config.capability_ext = ext.trim_start_matches('.').to_string();
        }
        if let Some(path) = get("ORCH_FLAKE_PATH") {
            config.flake_path = PathBuf::from(path);
        }
        if let Some(pool) = get("ORCH_STORAGE_POOL") {
            if pool.contains('/') {
                return Err(ConfigError::InvalidValue {
                    var: "ORCH_STORAGE_POOL",
                    value: pool.to_string(),
                    reason: "pool name must not contain '/'".to_string(),
                });
            }
            config.storage_pool = pool.to_string();
        }
        if let Some(root) = get("ORCH_STORAGE_MOUNT_ROOT") {
            config.storage_mount_root = PathBuf::from(path_clean::clean(root));
        }
        if let Some(quota) = get("ORCH_OWNER_QUOTA") {
            crate::storage::Quota::parse(quota).map_err(|reason| ConfigError::InvalidValue {
                var: "ORCH_OWNER_QUOTA",
                value: quota.to_string(),
                reason,
            })?;
            config.owner_quota = quota.to_string();
        }
        if let Some(key) = get("ORCH_MESH_AUTH_KEY") {
            config.mesh_auth_key = Some(AuthToken::new(key));
        }
        if let Some(backend) = get("ORCH_BACKEND") {
            config.backend = match backend {
                "system" => Backend::System,
                "simulation" => Backend::Simulation,
                other => {
                    return Err(ConfigError::InvalidValue {
                        var: "ORCH_BACKEND",
                        value: other.to_string(),
                        reason: "expected 'system' or 'simulation'".to_string(),
                    })
                }
            };
        }
        if let Some(profile) = get("ORCH_TIMEOUT_PROFILE") {
            config.timeouts =
                TimeoutConfig::from_profile(profile).ok_or_else(|| ConfigError::InvalidValue {
                    var: "ORCH_TIMEOUT_PROFILE",
                    value: profile.to_string(),
                    reason: "expected standard, aggressive, relaxed or disabled".to_string(),
                })?;
        }
        if let Some(secs) = get("ORCH_LOCK_TIMEOUT_SECS") {
            let secs = parse_secs("ORCH_LOCK_TIMEOUT_SECS", secs)?;
            config.timeouts.lock = TimeoutPolicy::Lock(Duration::from_secs(secs));
        }
        if let Some(addr) = get("ORCH_LISTEN_ADDR") {
            config.listen_addr = addr.parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::InvalidValue {
                    var: "ORCH_LISTEN_ADDR",
                    value: addr.to_string(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(secs) = get("ORCH_SESSION_TTL_SECS") {
            config.session_ttl = Duration::from_secs(parse_secs("ORCH_SESSION_TTL_SECS", secs)?);
        }

        Ok(config)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_secs(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
