/*!
 * System Limits and Constants
 *
 * Centralized location for naming constraints, timeouts and retry budgets.
 * Organized by domain so every subsystem pulls its defaults from one place.
 */

use std::time::Duration;

// =============================================================================
// WORKLOAD NAMING
// =============================================================================

/// Maximum workload name length (11 chars)
/// The runtime derives a host interface name `ve-<name>` from the workload name
/// and Linux caps interface names at 15 bytes; the runtime reserves one more.
pub const MAX_WORKLOAD_NAME_LEN: usize = 11;

/// Maximum owner identifier length
/// Owners become path components of the storage hierarchy
pub const MAX_OWNER_LEN: usize = 64;

/// Mount point of the persistent workspace inside every workload
pub const WORKSPACE_MOUNT_POINT: &str = "/workspace";

/// Device node granted to workloads that enroll in the mesh network
pub const TUN_DEVICE: &str = "/dev/net/tun";

/// Environment variables carrying identity tags into the workload
pub const OWNER_TAG: &str = "ORCH_OWNER";
pub const NAME_TAG: &str = "ORCH_WORKLOAD";

// =============================================================================
// STORAGE
// =============================================================================

/// Default volume pool
pub const DEFAULT_STORAGE_POOL: &str = "tank";

/// Default per-owner quota (shared by all of one owner's workloads)
pub const DEFAULT_OWNER_QUOTA: &str = "10G";

/// Standard timeout for volume commands (list/set/get)
pub const STANDARD_STORAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Volume create/destroy can be slower than property updates
pub const STANDARD_STORAGE_MUTATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts for recursive dataset destruction before escalating
pub const STORAGE_DESTROY_ATTEMPTS: u32 = 3;

// =============================================================================
// BUILDER / RUNTIME
// =============================================================================

/// Warm builder invocation (dependencies already cached)
pub const STANDARD_BUILD_TIMEOUT: Duration = Duration::from_secs(300);

/// First builder invocation after startup (cold cache, remote fetches)
pub const STANDARD_COLD_BUILD_TIMEOUT: Duration = Duration::from_secs(900);

/// Runtime control calls (start/stop/destroy/status)
pub const STANDARD_RUNTIME_TIMEOUT: Duration = Duration::from_secs(60);

/// Journal lines returned when the caller does not ask for a count
pub const DEFAULT_LOG_LINES: usize = 50;

/// Upper bound on journal lines per request
/// Keeps one response line well under the control server's size limits
pub const MAX_LOG_LINES: usize = 200;

// =============================================================================
// MESH NETWORK
// =============================================================================

/// Single enrollment attempt against the mesh service
pub const STANDARD_ENROLL_TIMEOUT: Duration = Duration::from_secs(45);

/// Best-effort deregistration during teardown
pub const STANDARD_DEREGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Enrollment attempts before the identity is marked failed
pub const ENROLL_ATTEMPTS: u32 = 5;

// =============================================================================
// CONCURRENCY
// =============================================================================

/// Per-name lock acquisition timeout
/// Long enough to queue behind a cold build on the same name
pub const STANDARD_LOCK_TIMEOUT: Duration = Duration::from_secs(1200);

// =============================================================================
// SESSIONS
// =============================================================================

/// Session history TTL for the control server (30 minutes)
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(1800);

/// History entries retained per requester
pub const DEFAULT_SESSION_MAX_ENTRIES: usize = 40;

/// Interval between out-of-band storage cleanup passes
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
