//! Snapshot Store: named, immutable archives of the service state tree
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/
//!   20260101-120000-manual/
//!     backup.tar.gz
//!     manifest.json
//!   20260102-031500-preheal/
//!     ...
//!   .tmp-<name>/            (in-flight creation, never listed)
//! ```
//!
//! Point names start with a UTC `%Y%m%d-%H%M%S` stamp, so lexicographic order
//! is chronological order. A point becomes visible only through the final
//! rename of its staging directory, so listing and retention never observe a
//! half-written archive.

mod archive;
mod restore;
mod retention;

pub use restore::{validate_point_name, RestoreManifest, RestoreOutcome};
pub use retention::{select_for_pruning, PruneReport};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SnapshotConfig;

pub const ARCHIVE_FILE: &str = "backup.tar.gz";
pub const MANIFEST_FILE: &str = "manifest.json";
const STAGING_PREFIX: &str = ".tmp-";
const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Why a snapshot point exists. Retention only ever touches `AutoPreheal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotKind {
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "auto-preheal")]
    AutoPreheal,
}

impl SnapshotKind {
    /// Suffix used in point names.
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoPreheal => "preheal",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoPreheal => "auto-preheal",
        }
    }
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `manifest.json` written next to each archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    #[serde(rename = "type")]
    pub kind: SnapshotKind,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_count: Option<u64>,
    #[serde(default)]
    pub subtrees: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
}

/// One listed point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotPoint {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub source_type: SnapshotKind,
    pub size_bytes: u64,
    pub archive_path: PathBuf,
    /// `None` when the manifest is missing or unreadable
    pub manifest: Option<SnapshotManifest>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archive error: {0}")]
    Archive(String),
    #[error("archive operation timed out after {0}s")]
    Timeout(u64),
    #[error("invalid snapshot point name '{0}'")]
    InvalidName(String),
    #[error("snapshot point '{0}' does not exist")]
    NotFound(String),
    #[error("nothing to snapshot under {}", .0.display())]
    NothingToArchive(PathBuf),
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl SnapshotError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Filesystem-backed snapshot store.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    source_root: PathBuf,
    subtrees: Vec<String>,
    config_file: String,
    archive_timeout: Duration,
}

impl SnapshotStore {
    /// Open (creating if needed) the store and sweep leftover staging directories.
    pub fn open(config: &SnapshotConfig) -> Result<Self, SnapshotError> {
        let store = Self {
            root: config.root.clone(),
            source_root: config.source_root.clone(),
            subtrees: config.subtrees.clone(),
            config_file: config.config_file.clone(),
            archive_timeout: Duration::from_secs(config.archive_timeout_secs),
        };
        std::fs::create_dir_all(&store.root).map_err(|e| SnapshotError::io(&store.root, e))?;
        store.sweep_staging();
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    fn sweep_staging(&self) {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(STAGING_PREFIX) {
                match std::fs::remove_dir_all(entry.path()) {
                    Ok(()) => info!(dir = %name, "Removed stale snapshot staging directory"),
                    Err(e) => warn!(dir = %name, error = %e, "Could not remove stale staging directory"),
                }
            }
        }
    }

    fn unique_name(&self, kind: SnapshotKind, now: DateTime<Utc>) -> String {
        let base = format!("{}-{}", now.format(STAMP_FORMAT), kind.suffix());
        if !self.root.join(&base).exists() {
            return base;
        }
        (2u32..)
            .map(|n| format!("{base}-{n:02}"))
            .find(|candidate| !self.root.join(candidate).exists())
            .unwrap_or(base)
    }

    /// Archive the configured subtrees and config file into a new point.
    ///
    /// The archive and manifest are built in a staging directory and renamed
    /// into place together; on any failure the staging directory is removed.
    pub async fn create_snapshot(&self, kind: SnapshotKind, now: DateTime<Utc>) -> Result<SnapshotPoint, SnapshotError> {
        let name = self.unique_name(kind, now);
        let staging = self.root.join(format!("{STAGING_PREFIX}{name}"));
        std::fs::create_dir_all(&staging).map_err(|e| SnapshotError::io(&staging, e))?;

        match self.build_point(&staging, kind, now).await {
            Ok(manifest) => {
                let final_dir = self.root.join(&name);
                if let Err(e) = std::fs::rename(&staging, &final_dir) {
                    let _ = std::fs::remove_dir_all(&staging);
                    return Err(SnapshotError::io(final_dir, e));
                }
                info!(point = %name, kind = %kind, size_bytes = manifest.size_bytes, "Snapshot created");
                Ok(SnapshotPoint {
                    archive_path: final_dir.join(ARCHIVE_FILE),
                    created_at: manifest.timestamp,
                    source_type: kind,
                    size_bytes: manifest.size_bytes,
                    manifest: Some(manifest),
                    name,
                })
            }
            Err(e) => {
                warn!(point = %name, error = %e, "Snapshot failed, discarding staging directory");
                let _ = std::fs::remove_dir_all(&staging);
                Err(e)
            }
        }
    }

    async fn build_point(&self, staging: &Path, kind: SnapshotKind, now: DateTime<Utc>) -> Result<SnapshotManifest, SnapshotError> {
        let archive_path = staging.join(ARCHIVE_FILE);
        let source_root = self.source_root.clone();
        let subtrees = self.subtrees.clone();
        let config_file = self.config_file.clone();

        let stats = run_blocking(self.archive_timeout, move || {
            archive::build_archive(&source_root, &subtrees, &config_file, &archive_path)
        })
        .await?;

        let manifest = SnapshotManifest {
            kind,
            timestamp: now,
            size_bytes: stats.size_bytes,
            files_count: Some(stats.files_count),
            subtrees: stats.subtrees,
            config_file: stats.config_file,
        };
        let manifest_path = staging.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(&manifest)?;
        std::fs::write(&manifest_path, json).map_err(|e| SnapshotError::io(manifest_path, e))?;
        Ok(manifest)
    }

    /// Point names, most recent first. Staging, hidden and archive-less directories are skipped.
    pub fn list_points(&self) -> Result<Vec<String>, SnapshotError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SnapshotError::io(&self.root, e)),
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()) && e.path().join(ARCHIVE_FILE).is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.') && validate_point_name(name).is_ok())
            .collect();
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Most recent point, if any.
    pub fn latest_point(&self) -> Result<Option<String>, SnapshotError> {
        Ok(self.list_points()?.into_iter().next())
    }

    /// Full details of one point. A missing manifest falls back to the name.
    pub fn point(&self, name: &str) -> Result<SnapshotPoint, SnapshotError> {
        validate_point_name(name)?;
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(SnapshotError::NotFound(name.to_string()));
        }

        let manifest = read_manifest(&dir.join(MANIFEST_FILE));
        let archive_path = dir.join(ARCHIVE_FILE);
        let (created_at, source_type, size_bytes) = match &manifest {
            Some(m) => (m.timestamp, m.kind, m.size_bytes),
            None => (
                timestamp_from_name(name).unwrap_or(DateTime::<Utc>::MIN_UTC),
                kind_from_name(name),
                std::fs::metadata(&archive_path).map_or(0, |m| m.len()),
            ),
        };

        Ok(SnapshotPoint {
            name: name.to_string(),
            created_at,
            source_type,
            size_bytes,
            archive_path,
            manifest,
        })
    }

    /// Details of every point, most recent first. Unreadable points are skipped.
    pub fn list_details(&self) -> Result<Vec<SnapshotPoint>, SnapshotError> {
        Ok(self
            .list_points()?
            .iter()
            .filter_map(|name| match self.point(name) {
                Ok(p) => Some(p),
                Err(e) => {
                    debug!(point = %name, error = %e, "Skipping unreadable point");
                    None
                }
            })
            .collect())
    }
}

fn read_manifest(path: &Path) -> Option<SnapshotManifest> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable snapshot manifest");
            None
        }
    }
}

/// Creation time encoded in a point name (`YYYYmmdd-HHMMSS-...`).
pub fn timestamp_from_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.get(..15)?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Kind encoded in a point name; anything not marked `preheal` is manual.
pub fn kind_from_name(name: &str) -> SnapshotKind {
    if name.split('-').any(|part| part == SnapshotKind::AutoPreheal.suffix()) {
        SnapshotKind::AutoPreheal
    } else {
        SnapshotKind::Manual
    }
}

/// Run blocking archive work off the runtime, bounded by `timeout`.
async fn run_blocking<T, F>(timeout: Duration, f: F) -> Result<T, SnapshotError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SnapshotError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(SnapshotError::Archive(format!("archive task failed: {join}"))),
        Err(_) => Err(SnapshotError::Timeout(timeout.as_secs())),
    }
}
