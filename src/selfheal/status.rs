//! Machine-readable status document written after every cycle.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::state::write_atomic;
use super::SelfHealState;
use crate::health::HealthReport;

/// `selfHeal.status` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealStatus {
    Idle,
    Triggered(String),
    NoBackup,
}

impl std::fmt::Display for HealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Triggered(point) => write!(f, "triggered:{point}"),
            Self::NoBackup => f.write_str("no_backup"),
        }
    }
}

impl Serialize for HealStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfHealSection {
    pub status: HealStatus,
    #[serde(flatten)]
    pub state: SelfHealState,
}

/// Contents of the status file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    /// Local-time `%Y-%m-%d %H:%M:%S` of the cycle
    pub last_check: String,
    pub checked_at: DateTime<Utc>,
    pub report: HealthReport,
    pub self_heal: SelfHealSection,
}

impl StatusDocument {
    pub fn new(report: HealthReport, state: SelfHealState, status: HealStatus, now: DateTime<Utc>) -> Self {
        Self {
            last_check: now.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string(),
            checked_at: now,
            report,
            self_heal: SelfHealSection { status, state },
        }
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        write_atomic(path, &json)
    }
}

/// Latest status document, shared with the HTTP endpoint.
pub type SharedStatus = Arc<RwLock<Option<StatusDocument>>>;
