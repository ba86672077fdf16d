//! Warden Configuration - every threshold and endpoint as operator-tunable TOML
//!
//! Each section implements `Default` with the values the monitored host ships
//! with, so an absent file means "standard deployment".

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one monitored host.
///
/// Load with `WardenConfig::load()` which searches:
/// 1. explicit path
/// 2. `$HOSTWARDEN_CONFIG`
/// 3. `./hostwarden.toml`
/// 4. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Polling cadence and local file locations
    pub monitor: MonitorConfig,
    /// API gateway process
    pub gateway: GatewayConfig,
    /// Local model-serving daemon
    pub model_server: ModelServerConfig,
    /// Optional database container
    pub container: ContainerConfig,
    /// Disk-space probe
    pub disk: DiskConfig,
    /// Load-average probe
    pub load: LoadConfig,
    /// Lifecycle command timing
    pub control: ControlConfig,
    /// Self-heal trigger policy
    pub self_heal: SelfHealConfig,
    /// Snapshot store and retention
    pub snapshots: SnapshotConfig,
    /// Notification sink
    pub notify: NotifyConfig,
    /// Read-only status endpoint
    pub api: ApiConfig,
}

impl WardenConfig {
    /// Load configuration using the standard search order, then apply
    /// environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(explicit)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_file(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        // 1. Explicit path must exist; a typo here is fatal.
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            info!(path = %path.display(), "Loaded config from --config");
            return Ok(config);
        }

        // 2. Check env var
        if let Ok(path) = std::env::var("HOSTWARDEN_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from HOSTWARDEN_CONFIG");
                        return Ok(config);
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from HOSTWARDEN_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "HOSTWARDEN_CONFIG points to non-existent file, falling back");
            }
        }

        // 3. Check ./hostwarden.toml
        let local = PathBuf::from("hostwarden.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./hostwarden.toml");
                    return Ok(config);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./hostwarden.toml, using defaults");
                }
            }
        }

        // 4. Defaults
        info!("No hostwarden.toml found, using built-in defaults");
        Ok(Self::default())
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse TOML text. Unknown keys are reported as warnings, never errors.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// Unparseable values are logged and ignored so a bad override never
    /// stops the monitor from starting with its previous value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SEEKDB_REQUIRED") {
            self.container.required = is_truthy(&v);
        }
        if let Some(v) = lookup("DOCKER_SPACE_REQUIRED") {
            self.container.space_required = is_truthy(&v);
        }
        if let Some(v) = lookup("SELF_HEAL_ENABLED") {
            self.self_heal.enabled = is_truthy(&v);
        }

        override_parsed(&lookup, "SYSTEM_LOAD_WARN_RATIO", &mut self.load.warn_ratio);
        override_parsed(&lookup, "SYSTEM_LOAD_CRIT_RATIO", &mut self.load.crit_ratio);
        override_parsed(&lookup, "SELF_HEAL_DOWN_MINUTES", &mut self.self_heal.down_threshold_minutes);
        override_parsed(&lookup, "SELF_HEAL_COOLDOWN_MINUTES", &mut self.self_heal.cooldown_minutes);
        override_parsed(&lookup, "AUTO_BACKUP_MAX_AGE_DAYS", &mut self.snapshots.max_age_days);
        override_parsed(&lookup, "AUTO_BACKUP_MAX_COUNT", &mut self.snapshots.max_count);
        override_parsed(&lookup, "MONITOR_INTERVAL_SECS", &mut self.monitor.interval_secs);

        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.notify.telegram_bot_token = Some(token.trim().to_string());
        }
        if let Some(chat) = lookup("TELEGRAM_CHAT_ID").filter(|c| !c.trim().is_empty()) {
            self.notify.telegram_chat_id = Some(chat.trim().to_string());
        }
    }

    /// Validate the config for internal consistency.
    ///
    /// All problems are collected so the operator sees them in one pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let errors = super::validation::validate_ranges(self);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Path of the persisted self-heal state.
    pub fn state_path(&self) -> PathBuf {
        self.monitor.data_dir.join("self_heal_state.json")
    }

    /// Path of the per-cycle status document.
    pub fn status_path(&self) -> PathBuf {
        self.monitor.data_dir.join("status.json")
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key = key, value = %raw, "Ignoring unparseable environment override"),
    }
}

/// `1`, `true`, `yes`, `on` (case-insensitive) are truthy.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from)
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

/// Polling cadence and local data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between self-heal cycles
    pub interval_secs: u64,
    /// Per-probe upper bound in seconds
    pub probe_timeout_secs: u64,
    /// Directory for the state file, status file and lock file
    pub data_dir: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::MONITOR_INTERVAL_SECS,
            probe_timeout_secs: defaults::PROBE_TIMEOUT_SECS,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// API gateway process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// CLI prefix; `status`, `start`, `stop` are appended
    pub cli: Vec<String>,
    /// Host for the TCP fallback probe
    pub host: String,
    /// Port for the TCP fallback probe
    pub port: u16,
    /// Direct health endpoint used during control verification
    pub health_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cli: vec!["openclaw".to_string(), "gateway".to_string()],
            host: "127.0.0.1".to_string(),
            port: defaults::GATEWAY_PORT,
            health_url: format!("http://127.0.0.1:{}/health", defaults::GATEWAY_PORT),
        }
    }
}

/// Local model-serving daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelServerConfig {
    /// Health endpoint returning the installed model list
    pub health_url: String,
    /// systemd unit restarted on Linux
    pub systemd_unit: String,
    /// launchd labels tried on macOS
    pub launchd_labels: Vec<String>,
}

impl Default for ModelServerConfig {
    fn default() -> Self {
        Self {
            health_url: format!("http://127.0.0.1:{}/api/tags", defaults::MODEL_SERVER_PORT),
            systemd_unit: "ollama".to_string(),
            launchd_labels: vec!["ai.ollama.serve".to_string(), "com.ollama.ollama".to_string()],
        }
    }
}

/// Optional database container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Container runtime CLI
    pub runtime: String,
    /// Container name filter
    pub name: String,
    /// Missing container counts as unhealthy instead of unknown
    pub required: bool,
    /// Runtime disk-usage check failures count as unhealthy instead of unknown
    pub space_required: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            name: defaults::CONTAINER_NAME.to_string(),
            required: false,
            space_required: false,
        }
    }
}

/// Disk-space probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Mount point to inspect
    pub path: PathBuf,
    pub critical_percent: u8,
    pub low_percent: u8,
    pub warning_percent: u8,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/"),
            critical_percent: defaults::DISK_CRITICAL_PERCENT,
            low_percent: defaults::DISK_LOW_PERCENT,
            warning_percent: defaults::DISK_WARNING_PERCENT,
        }
    }
}

/// Load-average probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Load per core that produces a warning
    pub warn_ratio: f64,
    /// Load per core that counts as unhealthy (clamped to >= warn_ratio)
    pub crit_ratio: f64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            warn_ratio: defaults::LOAD_WARN_RATIO,
            crit_ratio: defaults::LOAD_CRIT_RATIO,
        }
    }
}

/// Lifecycle command timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub command_timeout_secs: u64,
    pub start_settle_secs: u64,
    pub stop_settle_secs: u64,
    pub verify_attempts: u32,
    pub verify_spacing_secs: u64,
    pub restart_gap_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: defaults::CONTROL_COMMAND_TIMEOUT_SECS,
            start_settle_secs: defaults::START_SETTLE_SECS,
            stop_settle_secs: defaults::STOP_SETTLE_SECS,
            verify_attempts: defaults::VERIFY_ATTEMPTS,
            verify_spacing_secs: defaults::VERIFY_SPACING_SECS,
            restart_gap_secs: defaults::RESTART_GAP_SECS,
        }
    }
}

/// Self-heal trigger policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfHealConfig {
    pub enabled: bool,
    pub down_threshold_minutes: i64,
    pub cooldown_minutes: i64,
    pub stale_healing_minutes: i64,
}

impl Default for SelfHealConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            down_threshold_minutes: defaults::DOWN_THRESHOLD_MINUTES,
            cooldown_minutes: defaults::COOLDOWN_MINUTES,
            stale_healing_minutes: defaults::STALE_HEALING_MINUTES,
        }
    }
}

/// Snapshot store and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Directory holding one sub-directory per snapshot point
    pub root: PathBuf,
    /// Service state root that snapshots capture and restores write into
    pub source_root: PathBuf,
    /// Subtrees of `source_root` captured in each snapshot
    pub subtrees: Vec<String>,
    /// Top-level config file of `source_root` captured in each snapshot
    pub config_file: String,
    pub max_age_days: u32,
    pub max_count: usize,
    pub archive_timeout_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        let source_root = home_dir().join(".openclaw");
        Self {
            root: source_root.join("backups"),
            source_root,
            subtrees: defaults::SNAPSHOT_SUBTREES.iter().map(|s| (*s).to_string()).collect(),
            config_file: defaults::SNAPSHOT_CONFIG_FILE.to_string(),
            max_age_days: defaults::AUTO_BACKUP_MAX_AGE_DAYS,
            max_count: defaults::AUTO_BACKUP_MAX_COUNT,
            archive_timeout_secs: defaults::ARCHIVE_TIMEOUT_SECS,
        }
    }
}

/// Notification sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Telegram bot token (usually supplied via `TELEGRAM_BOT_TOKEN`)
    #[serde(skip_serializing)]
    pub telegram_bot_token: Option<String>,
    /// Recipient chat id
    pub telegram_chat_id: Option<String>,
}

/// Read-only status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind address; the endpoint is disabled when unset
    pub bind: Option<String>,
}
