//! Self-Heal Cycle Integration Tests
//!
//! Drives `SelfHealer::run_cycle_at` with scripted probes, a real snapshot
//! store in a temp dir and recording control/notification fakes. Time is
//! injected so the down timer, threshold and cooldown are exercised without
//! sleeping.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use hostwarden::config::WardenConfig;
use hostwarden::control::{ControlAction, ControlError, ControlReport, ServiceControl, Verification};
use hostwarden::health::{HealthVerdict, Probe, ProbeResult, ProbeSet, ServiceId};
use hostwarden::notify::NotificationSink;
use hostwarden::selfheal::{BlockReason, Decision, SelfHealState, SelfHealer, StateStore};
use hostwarden::snapshot::{SnapshotKind, SnapshotStore};

// ============================================================================
// Fakes
// ============================================================================

/// Gateway probe whose verdict the test flips between cycles.
struct SwitchProbe {
    verdict: Mutex<HealthVerdict>,
}

impl SwitchProbe {
    fn new(verdict: HealthVerdict) -> Arc<Self> {
        Arc::new(Self {
            verdict: Mutex::new(verdict),
        })
    }

    fn set(&self, verdict: HealthVerdict) {
        *self.verdict.lock().unwrap() = verdict;
    }
}

#[async_trait]
impl Probe for SwitchProbe {
    fn service_id(&self) -> ServiceId {
        ServiceId::Gateway
    }

    async fn check(&self) -> ProbeResult {
        let verdict = *self.verdict.lock().unwrap();
        ProbeResult::new(ServiceId::Gateway, verdict, format!("scripted {verdict:?}"))
    }
}

#[derive(Default)]
struct RecordingControl {
    restarts: AtomicUsize,
    panic_on_restart: bool,
}

#[async_trait]
impl ServiceControl for RecordingControl {
    async fn start(&self, service: ServiceId) -> Result<ControlReport, ControlError> {
        Ok(ControlReport::new(service, ControlAction::Start, Verification::Confirmed, "started"))
    }

    async fn stop(&self, service: ServiceId) -> Result<ControlReport, ControlError> {
        Ok(ControlReport::new(service, ControlAction::Stop, Verification::Confirmed, "stopped"))
    }

    async fn restart(&self, service: ServiceId) -> Result<ControlReport, ControlError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        assert!(!self.panic_on_restart, "restart exploded");
        Ok(ControlReport::new(service, ControlAction::Restart, Verification::Confirmed, "gateway back up"))
    }
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    _dir: TempDir,
    config: WardenConfig,
    gateway: Arc<SwitchProbe>,
    control: Arc<RecordingControl>,
    sink: Arc<RecordingSink>,
    store: SnapshotStore,
    healer: SelfHealer,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
}

fn minutes(n: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(n)
}

fn seed_state_tree(dir: &TempDir) {
    let source = dir.path().join("state");
    std::fs::create_dir_all(source.join("agents/main")).unwrap();
    std::fs::create_dir_all(source.join("memory")).unwrap();
    std::fs::write(source.join("agents/main/agent.json"), b"{\"id\":1}").unwrap();
    std::fs::write(source.join("memory/notes.md"), b"good state").unwrap();
    std::fs::write(source.join("openclaw.json"), b"{\"v\":1}").unwrap();
}

async fn harness_with(control: RecordingControl, tweak: impl FnOnce(&mut WardenConfig), seed_snapshot: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    seed_state_tree(&dir);

    let mut config = WardenConfig::default();
    config.monitor.data_dir = dir.path().join("data");
    config.snapshots.root = dir.path().join("backups");
    config.snapshots.source_root = dir.path().join("state");
    config.snapshots.subtrees = vec!["agents".to_string(), "memory".to_string()];
    config.self_heal.enabled = true;
    config.self_heal.down_threshold_minutes = 20;
    config.self_heal.cooldown_minutes = 60;
    tweak(&mut config);
    std::fs::create_dir_all(&config.monitor.data_dir).unwrap();

    let store = SnapshotStore::open(&config.snapshots).unwrap();
    if seed_snapshot {
        store
            .create_snapshot(SnapshotKind::Manual, t0() - Duration::days(1))
            .await
            .unwrap();
    }

    let gateway = SwitchProbe::new(HealthVerdict::Unhealthy);
    let probes = ProbeSet::new(vec![gateway.clone() as Arc<dyn Probe>], std::time::Duration::from_secs(5));
    let control = Arc::new(control);
    let sink = Arc::new(RecordingSink::default());
    let healer = SelfHealer::new(&config, probes, store.clone(), control.clone(), sink.clone());

    Harness {
        _dir: dir,
        config,
        gateway,
        control,
        sink,
        store,
        healer,
    }
}

async fn harness() -> Harness {
    harness_with(RecordingControl::default(), |_| {}, true).await
}

impl Harness {
    fn saved_state(&self) -> SelfHealState {
        StateStore::new(self.config.state_path()).load().unwrap()
    }
}

// ============================================================================
// Trigger path
// ============================================================================

/// Three unhealthy cycles ten minutes apart with a 20 minute threshold:
/// the third one triggers exactly one recovery.
#[tokio::test]
async fn test_triggers_on_third_unhealthy_cycle() {
    let h = harness().await;

    let first = h.healer.run_cycle_at(minutes(0)).await.unwrap();
    assert!(matches!(first.decision, Decision::Blocked(BlockReason::BelowThreshold { down_minutes: 0, .. })));
    assert_eq!(first.state.gateway_down_since, Some(minutes(0)));

    let second = h.healer.run_cycle_at(minutes(10)).await.unwrap();
    assert!(matches!(second.decision, Decision::Blocked(BlockReason::BelowThreshold { down_minutes: 10, .. })));

    let third = h.healer.run_cycle_at(minutes(20)).await.unwrap();
    assert_eq!(third.decision, Decision::Trigger);
    let heal = third.heal.expect("recovery ran");
    assert!(heal.ok, "{}", heal.message);
    assert!(heal.point.ends_with("-manual"));
    assert!(heal.preheal_snapshot.as_deref().is_some_and(|p| p.ends_with("-preheal")));
    assert_eq!(h.control.restarts.load(Ordering::SeqCst), 1);

    let state = h.saved_state();
    assert!(!state.healing);
    assert_eq!(state.last_heal_at, Some(minutes(20)));
    assert_eq!(state.last_heal_ok, Some(true));
    assert_eq!(state.gateway_down_minutes, 0);
    assert_eq!(state.gateway_down_since, Some(minutes(20)));
}

#[tokio::test]
async fn test_recovery_restores_damaged_state_tree() {
    let h = harness().await;
    let notes = h.config.snapshots.source_root.join("memory/notes.md");

    h.healer.run_cycle_at(minutes(0)).await.unwrap();
    std::fs::write(&notes, b"corrupted").unwrap();
    let outcome = h.healer.run_cycle_at(minutes(25)).await.unwrap();

    assert!(outcome.heal.is_some());
    assert_eq!(std::fs::read_to_string(&notes).unwrap(), "good state");
}

#[tokio::test]
async fn test_notifies_alert_trigger_and_completion() {
    let h = harness().await;
    h.healer.run_cycle_at(minutes(0)).await.unwrap();
    h.healer.run_cycle_at(minutes(30)).await.unwrap();

    let messages = h.sink.messages();
    assert!(messages.iter().any(|m| m.contains("problem(s) need attention")));
    assert!(messages.iter().any(|m| m.starts_with("Self-heal triggered: gateway down for 30 minutes")));
    assert!(messages.iter().any(|m| m.starts_with("Self-heal completed (ok)")));
}

// ============================================================================
// Blocking conditions
// ============================================================================

#[tokio::test]
async fn test_disabled_never_triggers() {
    let h = harness_with(RecordingControl::default(), |c| c.self_heal.enabled = false, true).await;
    h.healer.run_cycle_at(minutes(0)).await.unwrap();
    let outcome = h.healer.run_cycle_at(minutes(120)).await.unwrap();

    assert_eq!(outcome.decision, Decision::Blocked(BlockReason::Disabled));
    assert!(outcome.heal.is_none());
    assert_eq!(h.control.restarts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_snapshot_reports_no_backup() {
    let h = harness_with(RecordingControl::default(), |_| {}, false).await;
    h.healer.run_cycle_at(minutes(0)).await.unwrap();
    let outcome = h.healer.run_cycle_at(minutes(30)).await.unwrap();

    assert_eq!(outcome.decision, Decision::Blocked(BlockReason::NoSnapshot));
    let status: serde_json::Value =
        serde_json::from_slice(&std::fs::read(h.config.status_path()).unwrap()).unwrap();
    assert_eq!(status["selfHeal"]["status"], "no_backup");
}

#[tokio::test]
async fn test_cooldown_blocks_second_recovery() {
    let h = harness().await;
    h.healer.run_cycle_at(minutes(0)).await.unwrap();
    let healed = h.healer.run_cycle_at(minutes(20)).await.unwrap();
    assert_eq!(healed.decision, Decision::Trigger);

    // still down: a fresh 20 minute window elapses, but the cooldown has not
    h.healer.run_cycle_at(minutes(30)).await.unwrap();
    let blocked = h.healer.run_cycle_at(minutes(40)).await.unwrap();
    assert!(matches!(blocked.decision, Decision::Blocked(BlockReason::CoolingDown { remaining_minutes: 40 })));

    let again = h.healer.run_cycle_at(minutes(80)).await.unwrap();
    assert_eq!(again.decision, Decision::Trigger);
    assert_eq!(h.control.restarts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_fresh_healing_flag_blocks_and_stale_one_is_cleared() {
    let h = harness().await;
    let store = StateStore::new(h.config.state_path());

    let mut in_flight = SelfHealState {
        gateway_down_since: Some(minutes(-60)),
        ..SelfHealState::default()
    };
    in_flight.begin_healing(minutes(25));
    store.save(&in_flight).unwrap();
    let outcome = h.healer.run_cycle_at(minutes(30)).await.unwrap();
    assert_eq!(outcome.decision, Decision::Blocked(BlockReason::AlreadyHealing));
    assert_eq!(h.control.restarts.load(Ordering::SeqCst), 0);

    let mut crashed = in_flight.clone();
    crashed.healing_since = Some(minutes(-600));
    store.save(&crashed).unwrap();
    let outcome = h.healer.run_cycle_at(minutes(30)).await.unwrap();
    assert_eq!(outcome.decision, Decision::Trigger);
    assert!(!h.saved_state().healing);
}

#[tokio::test]
async fn test_healthy_cycle_resets_down_timer() {
    let h = harness().await;
    h.healer.run_cycle_at(minutes(0)).await.unwrap();
    h.healer.run_cycle_at(minutes(15)).await.unwrap();

    h.gateway.set(HealthVerdict::Healthy);
    let outcome = h.healer.run_cycle_at(minutes(25)).await.unwrap();
    assert_eq!(outcome.decision, Decision::Blocked(BlockReason::GatewayUp));
    assert_eq!(h.saved_state().gateway_down_since, None);
    assert_eq!(h.saved_state().gateway_down_minutes, 0);

    h.gateway.set(HealthVerdict::Unhealthy);
    let outcome = h.healer.run_cycle_at(minutes(35)).await.unwrap();
    assert!(matches!(outcome.decision, Decision::Blocked(BlockReason::BelowThreshold { down_minutes: 0, .. })));
}

#[tokio::test]
async fn test_unknown_gateway_verdict_does_not_count_as_down() {
    let h = harness().await;
    h.healer.run_cycle_at(minutes(0)).await.unwrap();
    h.gateway.set(HealthVerdict::Unknown);
    let outcome = h.healer.run_cycle_at(minutes(30)).await.unwrap();
    assert_eq!(outcome.decision, Decision::Blocked(BlockReason::GatewayUp));
    assert_eq!(outcome.report.problem_count, 0);
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_healing_cleared_when_restore_task_panics() {
    let control = RecordingControl {
        panic_on_restart: true,
        ..RecordingControl::default()
    };
    let h = harness_with(control, |_| {}, true).await;
    h.healer.run_cycle_at(minutes(0)).await.unwrap();
    let outcome = h.healer.run_cycle_at(minutes(20)).await.unwrap();

    let heal = outcome.heal.expect("recovery attempted");
    assert!(!heal.ok);
    let state = h.saved_state();
    assert!(!state.healing);
    assert_eq!(state.last_heal_ok, Some(false));
    assert!(h.sink.messages().iter().any(|m| m.starts_with("Self-heal completed (failed)")));
}

#[tokio::test]
async fn test_corrupt_state_file_starts_fresh() {
    let h = harness().await;
    std::fs::write(h.config.state_path(), b"{not json").unwrap();
    let outcome = h.healer.run_cycle_at(minutes(0)).await.unwrap();
    assert_eq!(outcome.state.gateway_down_since, Some(minutes(0)));
    assert!(!outcome.state.healing);
}

// ============================================================================
// Status document
// ============================================================================

#[tokio::test]
async fn test_status_file_and_shared_handle_follow_each_cycle() {
    let h = harness().await;
    let shared = h.healer.status_handle();
    assert!(shared.read().await.is_none());

    h.healer.run_cycle_at(minutes(0)).await.unwrap();
    let status: serde_json::Value =
        serde_json::from_slice(&std::fs::read(h.config.status_path()).unwrap()).unwrap();
    assert_eq!(status["selfHeal"]["status"], "idle");
    assert_eq!(status["selfHeal"]["healing"], false);
    assert_eq!(status["report"]["problemCount"], 1);
    assert!(status["lastCheck"].is_string());

    let healed = h.healer.run_cycle_at(minutes(20)).await.unwrap();
    let point = healed.heal.unwrap().point;
    let status: serde_json::Value =
        serde_json::from_slice(&std::fs::read(h.config.status_path()).unwrap()).unwrap();
    assert_eq!(status["selfHeal"]["status"], format!("triggered:{point}"));

    let latest = shared.read().await;
    assert_eq!(latest.as_ref().unwrap().checked_at, minutes(20));
}

#[tokio::test]
async fn test_preheal_points_are_retained_by_count() {
    let h = harness_with(RecordingControl::default(), |c| c.snapshots.max_count = 1, true).await;
    h.healer.run_cycle_at(minutes(0)).await.unwrap();
    h.healer.run_cycle_at(minutes(20)).await.unwrap();
    h.healer.run_cycle_at(minutes(40)).await.unwrap();
    h.healer.run_cycle_at(minutes(80)).await.unwrap();

    let points = h.store.list_points().unwrap();
    let preheal = points.iter().filter(|p| p.ends_with("-preheal")).count();
    let manual = points.iter().filter(|p| p.ends_with("-manual")).count();
    assert_eq!(preheal, 1);
    assert_eq!(manual, 1);
}
