//! Durable self-heal state and its JSON file.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::health::HealthVerdict;

/// Single-writer record carried from cycle to cycle.
///
/// `healing` is only `true` while one recovery is in flight; every path out
/// of a recovery clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfHealState {
    pub gateway_down_since: Option<DateTime<Utc>>,
    pub gateway_down_minutes: i64,
    pub healing: bool,
    pub healing_since: Option<DateTime<Utc>>,
    pub last_heal_at: Option<DateTime<Utc>>,
    pub last_heal_point: Option<String>,
    pub last_heal_ok: Option<bool>,
    pub last_heal_msg: Option<String>,
    pub last_preheal_snapshot: Option<String>,
}

impl SelfHealState {
    /// Fold this cycle's gateway verdict into the down timer.
    ///
    /// Anything other than `Unhealthy` (including a missing verdict) resets it.
    pub fn observe_gateway(&mut self, verdict: Option<HealthVerdict>, now: DateTime<Utc>) {
        if verdict == Some(HealthVerdict::Unhealthy) {
            let since = *self.gateway_down_since.get_or_insert(now);
            self.gateway_down_minutes = (now - since).num_minutes().max(0);
        } else {
            self.gateway_down_since = None;
            self.gateway_down_minutes = 0;
        }
    }

    pub fn begin_healing(&mut self, now: DateTime<Utc>) {
        self.healing = true;
        self.healing_since = Some(now);
    }

    /// Record a finished recovery and open a fresh observation window.
    pub fn finish_healing(&mut self, point: &str, ok: bool, message: impl Into<String>, now: DateTime<Utc>) {
        self.last_heal_at = Some(now);
        self.last_heal_point = Some(point.to_string());
        self.last_heal_ok = Some(ok);
        self.last_heal_msg = Some(message.into());
        self.gateway_down_since = Some(now);
        self.gateway_down_minutes = 0;
        self.healing = false;
        self.healing_since = None;
    }

    /// Clear a `healing` flag left behind by a crashed process.
    ///
    /// Returns true when the flag was cleared.
    pub fn clear_stale_healing(&mut self, stale_after_minutes: i64, now: DateTime<Utc>) -> bool {
        if !self.healing {
            return false;
        }
        let stale = self
            .healing_since
            .map_or(true, |since| now - since >= minutes_saturating(stale_after_minutes));
        if stale {
            self.healing = false;
            self.healing_since = None;
        }
        stale
    }
}

/// `Duration::minutes` without the overflow panic: out-of-range values clamp.
pub(crate) fn minutes_saturating(minutes: i64) -> Duration {
    Duration::try_minutes(minutes).unwrap_or(if minutes < 0 { Duration::MIN } else { Duration::MAX })
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state file I/O error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("state serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Write `bytes` to `path` atomically (temp file in the same directory, then rename).
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)
}

/// JSON file holding [`SelfHealState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state; a missing file is the default state.
    pub fn load(&self) -> Result<SelfHealState, StateError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SelfHealState::default()),
            Err(source) => Err(StateError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn save(&self, state: &SelfHealState) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &json).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
