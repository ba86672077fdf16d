//! Snapshot Store Integration Tests
//!
//! Create / list / prune / restore against a real directory tree.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

use hostwarden::config::SnapshotConfig;
use hostwarden::control::{ControlAction, ControlError, ControlReport, ServiceControl, Verification};
use hostwarden::health::ServiceId;
use hostwarden::snapshot::{SnapshotError, SnapshotKind, SnapshotStore};

#[derive(Default)]
struct RecordingControl {
    calls: Mutex<Vec<(ControlAction, ServiceId)>>,
}

#[async_trait]
impl ServiceControl for RecordingControl {
    async fn start(&self, service: ServiceId) -> Result<ControlReport, ControlError> {
        self.calls.lock().unwrap().push((ControlAction::Start, service));
        Ok(ControlReport::new(service, ControlAction::Start, Verification::Confirmed, "started"))
    }

    async fn stop(&self, service: ServiceId) -> Result<ControlReport, ControlError> {
        self.calls.lock().unwrap().push((ControlAction::Stop, service));
        Ok(ControlReport::new(service, ControlAction::Stop, Verification::Confirmed, "stopped"))
    }

    async fn restart(&self, service: ServiceId) -> Result<ControlReport, ControlError> {
        self.calls.lock().unwrap().push((ControlAction::Restart, service));
        Ok(ControlReport::new(service, ControlAction::Restart, Verification::Confirmed, "restarted"))
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 30, 12, 0, 0).unwrap()
}

fn open_store() -> (TempDir, SnapshotStore) {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("state");
    std::fs::create_dir_all(source.join("agents/main")).unwrap();
    std::fs::create_dir_all(source.join("memory")).unwrap();
    std::fs::create_dir_all(source.join("workspace")).unwrap();
    std::fs::write(source.join("agents/main/agent.json"), b"{\"id\":1}").unwrap();
    std::fs::write(source.join("memory/notes.md"), b"original").unwrap();
    std::fs::write(source.join("workspace/todo.txt"), b"ship it").unwrap();
    std::fs::write(source.join("openclaw.json"), b"{\"v\":1}").unwrap();

    let config = SnapshotConfig {
        root: dir.path().join("backups"),
        source_root: source,
        subtrees: vec![
            "agents".to_string(),
            "memory".to_string(),
            "workspace".to_string(),
            "credentials".to_string(),
        ],
        ..SnapshotConfig::default()
    };
    let store = SnapshotStore::open(&config).unwrap();
    (dir, store)
}

fn names(store: &SnapshotStore) -> BTreeSet<String> {
    store.list_points().unwrap().into_iter().collect()
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

// ============================================================================
// Create / list
// ============================================================================

#[tokio::test]
async fn test_create_then_list_details() {
    let (_dir, store) = open_store();
    let manual = store.create_snapshot(SnapshotKind::Manual, now() - Duration::hours(2)).await.unwrap();
    let auto = store.create_snapshot(SnapshotKind::AutoPreheal, now()).await.unwrap();

    assert_eq!(store.list_points().unwrap(), vec![auto.name.clone(), manual.name.clone()]);
    assert_eq!(store.latest_point().unwrap(), Some(auto.name.clone()));

    let details = store.list_details().unwrap();
    assert_eq!(details.len(), 2);
    assert_eq!(details[0].source_type, SnapshotKind::AutoPreheal);
    assert_eq!(details[1].source_type, SnapshotKind::Manual);
    let manifest = details[1].manifest.as_ref().unwrap();
    // credentials does not exist and is skipped, not an error
    assert_eq!(manifest.subtrees, vec!["agents", "memory", "workspace"]);
    assert_eq!(manifest.config_file.as_deref(), Some("openclaw.json"));
    assert!(details[1].size_bytes > 0);
}

#[tokio::test]
async fn test_empty_store_has_no_latest_point() {
    let (_dir, store) = open_store();
    assert!(store.list_points().unwrap().is_empty());
    assert_eq!(store.latest_point().unwrap(), None);
}

#[tokio::test]
async fn test_reopen_sweeps_interrupted_staging_dirs() {
    let (dir, store) = open_store();
    let staging = store.root().join(".tmp-20260630-120000-manual");
    std::fs::create_dir_all(&staging).unwrap();

    let config = SnapshotConfig {
        root: store.root().to_path_buf(),
        source_root: dir.path().join("state"),
        ..SnapshotConfig::default()
    };
    let reopened = SnapshotStore::open(&config).unwrap();
    assert!(!staging.exists());
    assert!(reopened.list_points().unwrap().is_empty());
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test]
async fn test_prune_drops_expired_then_trims_to_count() {
    let (_dir, store) = open_store();
    let mut by_age = Vec::new();
    for days in [1, 10, 95, 100, 200] {
        let point = store
            .create_snapshot(SnapshotKind::AutoPreheal, now() - Duration::days(days))
            .await
            .unwrap();
        by_age.push(point.name);
    }

    let report = store.prune_auto_points(90, 3, now()).unwrap();
    assert_eq!(report.deleted.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(names(&store), by_age[..2].iter().cloned().collect::<BTreeSet<_>>());
}

#[tokio::test]
async fn test_prune_keeps_newest_by_count() {
    let (_dir, store) = open_store();
    let mut created = Vec::new();
    for days in 1..=6 {
        let point = store
            .create_snapshot(SnapshotKind::AutoPreheal, now() - Duration::days(days))
            .await
            .unwrap();
        created.push(point.name);
    }

    store.prune_auto_points(90, 3, now()).unwrap();
    assert_eq!(names(&store), created[..3].iter().cloned().collect::<BTreeSet<_>>());
}

#[tokio::test]
async fn test_prune_never_touches_manual_points() {
    let (_dir, store) = open_store();
    let old_manual = store
        .create_snapshot(SnapshotKind::Manual, now() - Duration::days(400))
        .await
        .unwrap();
    for days in 1..=4 {
        store
            .create_snapshot(SnapshotKind::AutoPreheal, now() - Duration::days(days))
            .await
            .unwrap();
    }

    let report = store.prune_auto_points(90, 1, now()).unwrap();
    assert_eq!(report.deleted.len(), 3);
    let remaining = names(&store);
    assert!(remaining.contains(&old_manual.name));
    assert_eq!(remaining.len(), 2);
}

// ============================================================================
// Restore
// ============================================================================

#[tokio::test]
async fn test_restore_rejects_unsafe_names_before_touching_disk() {
    let (_dir, store) = open_store();
    let control = RecordingControl::default();
    for bad in ["", "/", "../etc", "a/b", "with space", "..", "."] {
        let err = store.restore(bad, &control, now()).await.unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidName(_)), "{bad:?} gave {err}");
    }
    assert!(control.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_restore_missing_point_is_not_found() {
    let (_dir, store) = open_store();
    let control = RecordingControl::default();
    let err = store.restore("20990101-000000-manual", &control, now()).await.unwrap_err();
    assert!(matches!(err, SnapshotError::NotFound(_)));
}

#[tokio::test]
async fn test_restore_replaces_items_backs_up_config_and_restarts_gateway() {
    let (dir, store) = open_store();
    let point = store.create_snapshot(SnapshotKind::Manual, now()).await.unwrap();

    let source = dir.path().join("state");
    std::fs::write(source.join("memory/notes.md"), b"damaged").unwrap();
    std::fs::write(source.join("memory/stray.md"), b"left over").unwrap();
    std::fs::write(source.join("openclaw.json"), b"{\"v\":2}").unwrap();

    let control = RecordingControl::default();
    let outcome = store.restore(&point.name, &control, now()).await.unwrap();

    assert!(outcome.ok, "{}", outcome.message);
    assert_eq!(read(&source.join("memory/notes.md")), "original");
    assert!(!source.join("memory/stray.md").exists());
    assert_eq!(read(&source.join("openclaw.json")), "{\"v\":1}");
    let backup = outcome.manifest.config_backup.as_ref().unwrap();
    assert_eq!(read(backup), "{\"v\":2}");
    assert_eq!(
        *control.calls.lock().unwrap(),
        vec![(ControlAction::Restart, ServiceId::Gateway)]
    );
}
