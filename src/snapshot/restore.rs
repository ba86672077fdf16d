//! Restore a point into the live state tree, then restart the dependent service.
//!
//! Not transactional: items are restored one by one and a failure part-way
//! leaves the earlier items in place. [`RestoreManifest`] records what
//! actually happened.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::archive::{copy_tree, extract_archive, locate_root};
use super::{read_manifest, run_blocking, SnapshotError, SnapshotStore, ARCHIVE_FILE, MANIFEST_FILE};
use crate::control::{ControlReport, ServiceControl};
use crate::health::ServiceId;

/// Reject anything but `[A-Za-z0-9._-]+`, and any `..`, before touching the filesystem.
pub fn validate_point_name(name: &str) -> Result<(), SnapshotError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if name.is_empty() || name == "." || name.contains("..") || !name.chars().all(allowed) {
        return Err(SnapshotError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Per-item record of one restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreManifest {
    pub point: String,
    pub restored: Vec<String>,
    /// Items listed for restore but absent from the archive
    pub missing: Vec<String>,
    /// `item: error` for items that could not be written
    pub failed: Vec<String>,
    pub config_backup: Option<PathBuf>,
}

impl RestoreManifest {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.restored.is_empty()
    }
}

/// Combined restore + restart result.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub manifest: RestoreManifest,
    pub restart: Option<ControlReport>,
    pub restart_error: Option<String>,
    pub ok: bool,
    pub message: String,
}

impl SnapshotStore {
    /// Extract `point` and copy its items into `dest_root`.
    pub async fn restore_files(&self, point: &str, dest_root: &Path, now: DateTime<Utc>) -> Result<RestoreManifest, SnapshotError> {
        validate_point_name(point)?;
        let point_dir = self.root().join(point);
        let archive = point_dir.join(ARCHIVE_FILE);
        if !archive.is_file() {
            return Err(SnapshotError::NotFound(point.to_string()));
        }

        let subtrees = read_manifest(&point_dir.join(MANIFEST_FILE))
            .map(|m| m.subtrees)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.subtrees.clone());
        let config_file = self.config_file.clone();
        let dest_root = dest_root.to_path_buf();
        let point_name = point.to_string();
        let stamp = now.format("%Y%m%d-%H%M%S").to_string();

        run_blocking(self.archive_timeout, move || {
            let scratch = tempfile::tempdir().map_err(|e| SnapshotError::io(std::env::temp_dir(), e))?;
            extract_archive(&archive, scratch.path())?;
            let root = locate_root(scratch.path(), &subtrees, &config_file);
            Ok(apply_items(&root, &dest_root, &subtrees, &config_file, &stamp, point_name))
        })
        .await
    }

    /// Restore `point` into the source root, then restart the gateway.
    ///
    /// Invalid names, missing points and extraction failures are errors;
    /// per-item and restart failures are reported in the outcome.
    pub async fn restore(&self, point: &str, control: &dyn ServiceControl, now: DateTime<Utc>) -> Result<RestoreOutcome, SnapshotError> {
        let manifest = self.restore_files(point, self.source_root(), now).await?;
        info!(
            point = %point,
            restored = manifest.restored.len(),
            failed = manifest.failed.len(),
            "Restore copied items"
        );

        let (restart, restart_error) = match control.restart(ServiceId::Gateway).await {
            Ok(report) => (Some(report), None),
            Err(e) => {
                warn!(point = %point, error = %e, "Restart after restore failed");
                (None, Some(e.to_string()))
            }
        };

        let ok = manifest.is_complete() && restart_error.is_none();
        let mut message = format!(
            "Restored {} item(s) from {point}: {}",
            manifest.restored.len(),
            manifest.restored.join(", ")
        );
        if !manifest.failed.is_empty() {
            message.push_str(&format!("; failed: {}", manifest.failed.join(", ")));
        }
        match (&restart, &restart_error) {
            (Some(report), _) => message.push_str(&format!("; {}", report.message)),
            (None, Some(e)) => message.push_str(&format!("; gateway restart failed: {e}")),
            (None, None) => {}
        }

        Ok(RestoreOutcome {
            manifest,
            restart,
            restart_error,
            ok,
            message,
        })
    }
}

fn apply_items(
    root: &Path,
    dest_root: &Path,
    subtrees: &[String],
    config_file: &str,
    stamp: &str,
    point: String,
) -> RestoreManifest {
    let mut manifest = RestoreManifest {
        point,
        ..RestoreManifest::default()
    };

    if let Err(e) = std::fs::create_dir_all(dest_root) {
        manifest.failed.push(format!("{}: {e}", dest_root.display()));
        return manifest;
    }

    let config_src = root.join(config_file);
    if config_src.is_file() {
        let config_dest = dest_root.join(config_file);
        if config_dest.is_file() {
            let backup = dest_root.join(format!("{config_file}.bak.{stamp}"));
            match std::fs::copy(&config_dest, &backup) {
                Ok(_) => manifest.config_backup = Some(backup),
                Err(e) => warn!(error = %e, "Could not back up existing config file"),
            }
        }
        match std::fs::copy(&config_src, &config_dest) {
            Ok(_) => manifest.restored.push(config_file.to_string()),
            Err(e) => manifest.failed.push(format!("{config_file}: {e}")),
        }
    } else {
        manifest.missing.push(config_file.to_string());
    }

    for subtree in subtrees {
        let src = root.join(subtree);
        if !src.is_dir() {
            manifest.missing.push(subtree.clone());
            continue;
        }
        let dest = dest_root.join(subtree);
        let result = replace_tree(&src, &dest);
        match result {
            Ok(files) => {
                info!(subtree = %subtree, files, "Subtree restored");
                manifest.restored.push(subtree.clone());
            }
            Err(e) => {
                warn!(subtree = %subtree, error = %e, "Subtree restore failed");
                manifest.failed.push(format!("{subtree}: {e}"));
            }
        }
    }
    manifest
}

fn replace_tree(src: &Path, dest: &Path) -> Result<u64, SnapshotError> {
    if dest.exists() {
        std::fs::remove_dir_all(dest).map_err(|e| SnapshotError::io(dest, e))?;
    }
    copy_tree(src, dest)
}
