//! Two-phase retention for automatically created points.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::{SnapshotError, SnapshotKind, SnapshotPoint, SnapshotStore};

/// Points removed (or not) by one pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Names of the points a pruning pass should delete.
///
/// Phase one drops every auto point older than `max_age_days`; phase two
/// drops the oldest surviving auto points until at most `max_count` remain.
/// Manual points are never selected and never counted.
pub fn select_for_pruning(points: &[SnapshotPoint], max_age_days: u32, max_count: usize, now: DateTime<Utc>) -> Vec<String> {
    let cutoff = now
        .checked_sub_signed(Duration::days(i64::from(max_age_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut auto: Vec<&SnapshotPoint> = points
        .iter()
        .filter(|p| p.source_type == SnapshotKind::AutoPreheal)
        .collect();
    auto.sort_by(|a, b| b.name.cmp(&a.name));

    let (survivors, mut doomed): (Vec<&SnapshotPoint>, Vec<&SnapshotPoint>) =
        auto.into_iter().partition(|p| p.created_at >= cutoff);

    doomed.extend(survivors.into_iter().skip(max_count));
    doomed.into_iter().map(|p| p.name.clone()).collect()
}

impl SnapshotStore {
    /// Apply retention to auto points. Deletion failures are logged and reported, never retried.
    pub fn prune_auto_points(&self, max_age_days: u32, max_count: usize, now: DateTime<Utc>) -> Result<PruneReport, SnapshotError> {
        let points = self.list_details()?;
        let mut report = PruneReport::default();

        for name in select_for_pruning(&points, max_age_days, max_count, now) {
            let dir = self.root().join(&name);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {
                    info!(point = %name, "Pruned auto snapshot");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(point = %name, error = %e, "Failed to prune snapshot");
                    report.failed.push(name);
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn point(name: &str, kind: SnapshotKind, created_at: DateTime<Utc>) -> SnapshotPoint {
        SnapshotPoint {
            name: name.to_string(),
            created_at,
            source_type: kind,
            size_bytes: 0,
            archive_path: PathBuf::new(),
            manifest: None,
        }
    }

    fn aged(now: DateTime<Utc>, days: i64, kind: SnapshotKind) -> SnapshotPoint {
        let at = now - Duration::days(days);
        point(&format!("{}-{}", at.format("%Y%m%d-%H%M%S"), kind.suffix()), kind, at)
    }

    #[test]
    fn test_age_phase_then_count_phase() {
        let now = Utc::now();
        let points: Vec<_> = [1, 10, 95, 100, 200]
            .into_iter()
            .map(|d| aged(now, d, SnapshotKind::AutoPreheal))
            .collect();
        let mut doomed = select_for_pruning(&points, 90, 3, now);
        doomed.sort();
        let mut expected: Vec<_> = points[2..].iter().map(|p| p.name.clone()).collect();
        expected.sort();
        assert_eq!(doomed, expected);
    }

    #[test]
    fn test_count_phase_keeps_newest() {
        let now = Utc::now();
        let points: Vec<_> = (1..=6).map(|d| aged(now, d, SnapshotKind::AutoPreheal)).collect();
        let doomed = select_for_pruning(&points, 90, 3, now);
        assert_eq!(doomed, points[3..].iter().map(|p| p.name.clone()).collect::<Vec<_>>());
    }

    #[test]
    fn test_manual_points_are_never_selected() {
        let now = Utc::now();
        let points = vec![
            aged(now, 400, SnapshotKind::Manual),
            aged(now, 300, SnapshotKind::Manual),
            aged(now, 1, SnapshotKind::AutoPreheal),
        ];
        assert!(select_for_pruning(&points, 90, 1, now).is_empty());
    }
}
