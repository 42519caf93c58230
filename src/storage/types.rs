/*!
 * Storage Types
 * Quotas, dataset handles and usage reports
 */

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

const UNITS: [(char, u64); 5] = [
    ('P', 1 << 50),
    ('T', 1 << 40),
    ('G', 1 << 30),
    ('M', 1 << 20),
    ('K', 1 << 10),
];

/// Owner-level storage ceiling in volume-manager notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quota {
    Unlimited,
    Bytes(u64),
}

impl Quota {
    /// Parse `10G`, `512M`, `1073741824` or `none`
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("none") {
            return Ok(Quota::Unlimited);
        }
        if raw.is_empty() {
            return Err("quota is empty".to_string());
        }

        let (digits, multiplier) = match raw.chars().last().map(|c| c.to_ascii_uppercase()) {
            Some(c) if c.is_ascii_digit() => (raw, 1),
            Some(c) => {
                let multiplier = UNITS
                    .iter()
                    .find(|(unit, _)| *unit == c)
                    .map(|(_, m)| *m)
                    .ok_or_else(|| format!("unknown size suffix '{}'", c))?;
                (&raw[..raw.len() - 1], multiplier)
            }
            None => return Err("quota is empty".to_string()),
        };

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("'{}' is not a whole number", digits))?;
        if value == 0 {
            return Err("quota must be positive; use 'none' to disable".to_string());
        }
        value
            .checked_mul(multiplier)
            .map(Quota::Bytes)
            .ok_or_else(|| "quota overflows".to_string())
    }

    pub fn bytes(&self) -> Option<u64> {
        match self {
            Quota::Unlimited => None,
            Quota::Bytes(b) => Some(*b),
        }
    }
}

/// Renders the volume-manager property value (`10G`, `none`)
impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Quota::Unlimited => f.write_str("none"),
            Quota::Bytes(bytes) => {
                for (unit, size) in UNITS {
                    if *bytes % size == 0 {
                        return write!(f, "{}{}", bytes / size, unit);
                    }
                }
                write!(f, "{}", bytes)
            }
        }
    }
}

impl Serialize for Quota {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Human-readable byte count (`512B`, `1.5K`, `10.0G`)
pub fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut size = bytes as f64;
    for unit in ["K", "M", "G", "T"] {
        size /= 1024.0;
        if size < 1024.0 {
            return format!("{:.1}{}", size, unit);
        }
    }
    format!("{:.1}P", size / 1024.0)
}

/// Per-workload persistent storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageDataset {
    /// Workspace dataset name
    pub dataset: String,
    /// Host path bind-mounted into the workload
    pub path: PathBuf,
    /// Owner root dataset the quota is enforced on
    pub owner_root: String,
    pub quota: Quota,
}

/// Raw usage of one dataset subtree as reported by the volume manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeUsage {
    pub quota: Option<u64>,
    pub used: u64,
    pub available: u64,
}

/// Owner storage report for callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub owner: String,
    pub quota: String,
    pub used: String,
    pub available: String,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

impl StorageUsage {
    pub fn from_volume(owner: &str, usage: VolumeUsage) -> Self {
        Self {
            owner: owner.to_string(),
            quota: usage
                .quota
                .map(human_size)
                .unwrap_or_else(|| "none".to_string()),
            used: human_size(usage.used),
            available: human_size(usage.available),
            used_bytes: usage.used,
            available_bytes: usage.available,
        }
    }
}

impl fmt::Display for StorageUsage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Storage for '{}': used {} of {} quota ({} available)",
            self.owner, self.used, self.quota, self.available
        )
    }
}
