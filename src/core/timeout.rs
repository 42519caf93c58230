/*!
 * Timeout Configuration
 *
 * Per-call timeout policies for every external-call boundary:
 * - Storage: volume manager commands
 * - Build: builder invocation, with a longer allowance for the first (cold) build
 * - Runtime: sandbox control calls
 * - Enroll/Deregister: mesh network service
 * - Lock: per-name lock acquisition
 */

use super::limits::*;
use std::future::Future;
use std::time::{Duration, Instant};

/// Timeout policy for a single external call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// No timeout (infinite wait) - use sparingly!
    None,

    /// Volume manager command
    Storage(Duration),

    /// Builder invocation
    Build(Duration),

    /// Sandbox runtime control call
    Runtime(Duration),

    /// Mesh network call
    Network(Duration),

    /// Lock acquisition
    Lock(Duration),
}

impl TimeoutPolicy {
    /// Get the duration for this policy
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Storage(d)
            | Self::Build(d)
            | Self::Runtime(d)
            | Self::Network(d)
            | Self::Lock(d) => Some(*d),
        }
    }

    /// Check if this timeout has expired
    pub fn is_expired(&self, start: Instant) -> bool {
        match self.duration() {
            None => false,
            Some(d) => start.elapsed() >= d,
        }
    }

    /// Get timeout category as string
    pub fn category(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Storage(_) => "storage",
            Self::Build(_) => "build",
            Self::Runtime(_) => "runtime",
            Self::Network(_) => "network",
            Self::Lock(_) => "lock",
        }
    }

    /// Run a future under this policy; `Err(elapsed)` when it expires
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Duration> {
        match self.duration() {
            None => Ok(fut.await),
            Some(d) => tokio::time::timeout(d, fut).await.map_err(|_| d),
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::None
    }
}

/// Timeout configuration for all external calls
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Volume list/get/set (default: 10s)
    pub storage: TimeoutPolicy,

    /// Volume create/destroy (default: 30s)
    pub storage_mutation: TimeoutPolicy,

    /// Warm builder invocation (default: 300s)
    pub build: TimeoutPolicy,

    /// First builder invocation after startup (default: 900s)
    pub cold_build: TimeoutPolicy,

    /// Runtime control calls (default: 60s)
    pub runtime: TimeoutPolicy,

    /// One mesh enrollment attempt (default: 45s)
    pub enroll: TimeoutPolicy,

    /// Mesh deregistration (default: 10s)
    pub deregister: TimeoutPolicy,

    /// Per-name lock acquisition (default: 1200s)
    pub lock: TimeoutPolicy,
}

impl TimeoutConfig {
    /// Create default timeout configuration
    pub fn new() -> Self {
        Self {
            storage: TimeoutPolicy::Storage(STANDARD_STORAGE_TIMEOUT),
            storage_mutation: TimeoutPolicy::Storage(STANDARD_STORAGE_MUTATION_TIMEOUT),
            build: TimeoutPolicy::Build(STANDARD_BUILD_TIMEOUT),
            cold_build: TimeoutPolicy::Build(STANDARD_COLD_BUILD_TIMEOUT),
            runtime: TimeoutPolicy::Runtime(STANDARD_RUNTIME_TIMEOUT),
            enroll: TimeoutPolicy::Network(STANDARD_ENROLL_TIMEOUT),
            deregister: TimeoutPolicy::Network(STANDARD_DEREGISTER_TIMEOUT),
            lock: TimeoutPolicy::Lock(STANDARD_LOCK_TIMEOUT),
        }
    }

    /// Create configuration with all timeouts disabled (testing only)
    pub fn disabled() -> Self {
        Self {
            storage: TimeoutPolicy::None,
            storage_mutation: TimeoutPolicy::None,
            build: TimeoutPolicy::None,
            cold_build: TimeoutPolicy::None,
            runtime: TimeoutPolicy::None,
            enroll: TimeoutPolicy::None,
            deregister: TimeoutPolicy::None,
            lock: TimeoutPolicy::None,
        }
    }

    /// Create aggressive timeout configuration for development
    pub fn aggressive() -> Self {
        Self {
            storage: TimeoutPolicy::Storage(Duration::from_secs(5)),
            storage_mutation: TimeoutPolicy::Storage(Duration::from_secs(10)),
            build: TimeoutPolicy::Build(Duration::from_secs(120)),
            cold_build: TimeoutPolicy::Build(Duration::from_secs(300)),
            runtime: TimeoutPolicy::Runtime(Duration::from_secs(20)),
            enroll: TimeoutPolicy::Network(Duration::from_secs(15)),
            deregister: TimeoutPolicy::Network(Duration::from_secs(5)),
            lock: TimeoutPolicy::Lock(Duration::from_secs(300)),
        }
    }

    /// Create relaxed timeout configuration for slow environments
    pub fn relaxed() -> Self {
        Self {
            storage: TimeoutPolicy::Storage(Duration::from_secs(30)),
            storage_mutation: TimeoutPolicy::Storage(Duration::from_secs(120)),
            build: TimeoutPolicy::Build(Duration::from_secs(900)),
            cold_build: TimeoutPolicy::Build(Duration::from_secs(2700)),
            runtime: TimeoutPolicy::Runtime(Duration::from_secs(180)),
            enroll: TimeoutPolicy::Network(Duration::from_secs(120)),
            deregister: TimeoutPolicy::Network(Duration::from_secs(30)),
            lock: TimeoutPolicy::Lock(Duration::from_secs(3600)),
        }
    }

    /// Resolve a profile name (`standard`, `aggressive`, `relaxed`, `disabled`)
    pub fn from_profile(profile: &str) -> Option<Self> {
        match profile {
            "standard" => Some(Self::new()),
            "aggressive" => Some(Self::aggressive()),
            "relaxed" => Some(Self::relaxed()),
            "disabled" => Some(Self::disabled()),
            _ => None,
        }
    }

    /// Builder timeout for the next invocation
    pub fn build_for(&self, warm: bool) -> TimeoutPolicy {
        if warm {
            self.build
        } else {
            self.cold_build
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::new()
    }
}
