//! System-wide default constants.
//!
//! Centralises the numbers that tune polling, verification and retention.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Polling
// ============================================================================

/// Interval between self-heal cycles (seconds). 600 = 10 minutes.
pub const MONITOR_INTERVAL_SECS: u64 = 600;

/// Upper bound for a single probe, including its own internal timeouts (seconds).
pub const PROBE_TIMEOUT_SECS: u64 = 10;

/// Timeout for the gateway CLI status query (seconds).
pub const GATEWAY_STATUS_TIMEOUT_SECS: u64 = 10;

/// Timeout for the TCP fallback connect to the gateway port (seconds).
pub const GATEWAY_CONNECT_TIMEOUT_SECS: u64 = 3;

/// Timeout for the model-server HTTP health request (seconds).
pub const MODEL_SERVER_HTTP_TIMEOUT_SECS: u64 = 5;

/// Timeout for direct HTTP health checks issued during control verification (seconds).
pub const DIRECT_HEALTH_TIMEOUT_SECS: u64 = 3;

// ============================================================================
// Well-known endpoints
// ============================================================================

/// Gateway listen port.
pub const GATEWAY_PORT: u16 = 18_789;

/// Model-server listen port.
pub const MODEL_SERVER_PORT: u16 = 11_434;

/// Container probed by the container probe.
pub const CONTAINER_NAME: &str = "seekdb";

// ============================================================================
// Disk / Load thresholds
// ============================================================================

/// Disk usage (percent) at or above which the disk is critical.
pub const DISK_CRITICAL_PERCENT: u8 = 95;

/// Disk usage (percent) at or above which free space is low.
pub const DISK_LOW_PERCENT: u8 = 90;

/// Disk usage (percent) at or above which a warning is shown (still healthy).
pub const DISK_WARNING_PERCENT: u8 = 80;

/// Load-per-core ratio that produces a warning.
pub const LOAD_WARN_RATIO: f64 = 1.2;

/// Load-per-core ratio that counts as unhealthy.
pub const LOAD_CRIT_RATIO: f64 = 1.8;

// ============================================================================
// Control verification
// ============================================================================

/// Timeout for lifecycle commands (seconds).
pub const CONTROL_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Delay after issuing a start command before verification begins (seconds).
pub const START_SETTLE_SECS: u64 = 5;

/// Delay after issuing a stop command before verification begins (seconds).
pub const STOP_SETTLE_SECS: u64 = 2;

/// Number of re-probes after a lifecycle command.
pub const VERIFY_ATTEMPTS: u32 = 3;

/// Spacing between re-probes (seconds).
pub const VERIFY_SPACING_SECS: u64 = 2;

/// Gap between the stop and start halves of a restart (seconds).
pub const RESTART_GAP_SECS: u64 = 3;

// ============================================================================
// Self-heal
// ============================================================================

/// Continuous gateway downtime required before recovery may trigger (minutes).
pub const DOWN_THRESHOLD_MINUTES: i64 = 20;

/// Minimum time between two automatic recoveries (minutes).
pub const COOLDOWN_MINUTES: i64 = 60;

/// Age after which a leftover `healing=true` flag is treated as a crash remnant (minutes).
pub const STALE_HEALING_MINUTES: i64 = 60;

// ============================================================================
// Snapshots
// ============================================================================

/// Auto pre-heal snapshots older than this are pruned (days).
pub const AUTO_BACKUP_MAX_AGE_DAYS: u32 = 90;

/// At most this many auto pre-heal snapshots survive retention.
pub const AUTO_BACKUP_MAX_COUNT: usize = 10;

/// Upper bound for archive creation or extraction (seconds).
pub const ARCHIVE_TIMEOUT_SECS: u64 = 300;

/// Subtrees of the state root captured in every snapshot.
pub const SNAPSHOT_SUBTREES: &[&str] = &["agents", "memory", "workspace", "credentials"];

/// Top-level config file captured in every snapshot.
pub const SNAPSHOT_CONFIG_FILE: &str = "openclaw.json";

// ============================================================================
// Notifications
// ============================================================================

/// Telegram caps a single message at 4096 characters; keep headroom.
pub const NOTIFY_MAX_CHARS: usize = 3_500;

/// Timeout for delivering one notification (seconds).
pub const NOTIFY_TIMEOUT_SECS: u64 = 10;
