use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::policy::{decide, BlockReason, Decision, HealPolicy};
use super::state::{SelfHealState, StateError, StateStore};
use super::status::{HealStatus, SharedStatus, StatusDocument};
use crate::config::WardenConfig;
use crate::control::ServiceControl;
use crate::health::{HealthReport, ProbeSet, ServiceId};
use crate::notify::NotificationSink;
use crate::snapshot::{SnapshotKind, SnapshotStore};

/// Result of one recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealOutcome {
    pub point: String,
    pub preheal_snapshot: Option<String>,
    pub ok: bool,
    pub message: String,
}

/// Everything one cycle observed and did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub report: HealthReport,
    pub state: SelfHealState,
    pub decision: Decision,
    pub heal: Option<HealOutcome>,
}

/// Periodic poll → decide → recover → persist loop.
pub struct SelfHealer {
    probes: ProbeSet,
    store: SnapshotStore,
    control: Arc<dyn ServiceControl>,
    notifier: Arc<dyn NotificationSink>,
    state_store: StateStore,
    status_path: PathBuf,
    policy: HealPolicy,
    max_age_days: u32,
    max_count: usize,
    interval: Duration,
    latest: SharedStatus,
}

impl SelfHealer {
    pub fn new(
        config: &WardenConfig,
        probes: ProbeSet,
        store: SnapshotStore,
        control: Arc<dyn ServiceControl>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            probes,
            store,
            control,
            notifier,
            state_store: StateStore::new(config.state_path()),
            status_path: config.status_path(),
            policy: HealPolicy::from(&config.self_heal),
            max_age_days: config.snapshots.max_age_days,
            max_count: config.snapshots.max_count,
            interval: config.monitor.interval(),
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Shared handle to the latest status document (for the HTTP endpoint).
    pub fn status_handle(&self) -> SharedStatus {
        self.latest.clone()
    }

    pub fn state_store(&self) -> &StateStore {
        &self.state_store
    }

    /// Run cycles every interval until `cancel` fires.
    ///
    /// A running cycle is never interrupted; cancellation takes effect between cycles.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            enabled = self.policy.enabled,
            threshold_minutes = self.policy.down_threshold_minutes,
            "Self-healer started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.run_cycle_at(Utc::now()).await {
                Ok(outcome) => debug!(
                    problems = outcome.report.problem_count,
                    down_minutes = outcome.state.gateway_down_minutes,
                    "Cycle finished"
                ),
                Err(e) => error!(error = %e, "Self-heal cycle failed, keeping last persisted state"),
            }
        }
        info!("Self-healer stopped");
    }

    /// One full cycle at `now`.
    ///
    /// Only a failure to persist the state is returned; everything else is
    /// folded into the outcome and logged.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleOutcome, StateError> {
        let mut state = match self.state_store.load() {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Could not load self-heal state, starting fresh");
                SelfHealState::default()
            }
        };
        if state.clear_stale_healing(self.policy.stale_healing_minutes, now) {
            warn!("Cleared healing flag left over from an interrupted recovery");
        }

        let report = self.probes.run(now).await;
        if report.problem_count > 0 {
            self.notifier.send(&report.render()).await;
        }

        state.observe_gateway(report.verdict(ServiceId::Gateway), now);

        let latest_point = match self.store.latest_point() {
            Ok(point) => point,
            Err(e) => {
                warn!(error = %e, "Could not list snapshot points");
                None
            }
        };
        let decision = decide(&state, &self.policy, now, latest_point.is_some());
        debug!(?decision, down_minutes = state.gateway_down_minutes, "Self-heal decision");

        let (heal, heal_status) = match (decision, latest_point) {
            (Decision::Trigger, Some(point)) => {
                let outcome = self.recover(&mut state, point.clone(), now).await;
                (Some(outcome), HealStatus::Triggered(point))
            }
            (Decision::Blocked(BlockReason::NoSnapshot), _) => {
                warn!("Gateway down past threshold but no snapshot point exists");
                (None, HealStatus::NoBackup)
            }
            _ => (None, HealStatus::Idle),
        };

        self.state_store.save(&state)?;

        let doc = StatusDocument::new(report.clone(), state.clone(), heal_status, now);
        if let Err(e) = doc.write_to(&self.status_path) {
            warn!(path = %self.status_path.display(), error = %e, "Could not write status file");
        }
        *self.latest.write().await = Some(doc);

        Ok(CycleOutcome {
            report,
            state,
            decision,
            heal,
        })
    }

    /// Pre-heal snapshot, restore of `point`, restart, bookkeeping.
    ///
    /// `state.healing` is set and persisted first and is cleared on every
    /// path out, including a panic inside the restore task.
    async fn recover(&self, state: &mut SelfHealState, point: String, now: DateTime<Utc>) -> HealOutcome {
        state.begin_healing(now);
        if let Err(e) = self.state_store.save(state) {
            warn!(error = %e, "Could not persist healing flag");
        }
        warn!(point = %point, down_minutes = state.gateway_down_minutes, "Self-heal triggered");
        self.notifier
            .send(&format!(
                "Self-heal triggered: gateway down for {} minutes, restoring {point}",
                state.gateway_down_minutes
            ))
            .await;

        let mut notes = Vec::new();
        let preheal_snapshot = match self.store.create_snapshot(SnapshotKind::AutoPreheal, now).await {
            Ok(snapshot) => Some(snapshot.name),
            Err(e) => {
                warn!(error = %e, "Pre-heal snapshot failed, continuing with restore");
                notes.push(format!("pre-heal snapshot failed: {e}"));
                None
            }
        };
        if preheal_snapshot.is_some() {
            state.last_preheal_snapshot.clone_from(&preheal_snapshot);
        }

        let store = self.store.clone();
        let control = self.control.clone();
        let target = point.clone();
        let task = tokio::spawn(async move { store.restore(&target, control.as_ref(), now).await });

        let (ok, message) = match task.await {
            Ok(Ok(outcome)) => (outcome.ok, outcome.message),
            Ok(Err(e)) => (false, format!("restore failed: {e}")),
            Err(join) => (false, format!("recovery task aborted: {join}")),
        };
        let message = if notes.is_empty() {
            message
        } else {
            format!("{message} ({})", notes.join("; "))
        };

        state.finish_healing(&point, ok, message.clone(), now);
        if ok {
            info!(point = %point, "Self-heal completed");
        } else {
            error!(point = %point, message = %message, "Self-heal failed");
        }
        self.notifier
            .send(&format!(
                "Self-heal completed ({}): {message}",
                if ok { "ok" } else { "failed" }
            ))
            .await;

        match self.store.prune_auto_points(self.max_age_days, self.max_count, now) {
            Ok(pruned) if !pruned.deleted.is_empty() => {
                info!(deleted = pruned.deleted.len(), "Retention pruned auto snapshots");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Retention pass failed"),
        }

        HealOutcome {
            point,
            preheal_snapshot,
            ok,
            message,
        }
    }
}
