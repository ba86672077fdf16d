//! Trigger decision for automatic recovery. Pure; time is passed in.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::minutes_saturating;
use super::SelfHealState;
use crate::config::SelfHealConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealPolicy {
    pub enabled: bool,
    pub down_threshold_minutes: i64,
    pub cooldown_minutes: i64,
    pub stale_healing_minutes: i64,
}

impl From<&SelfHealConfig> for HealPolicy {
    fn from(c: &SelfHealConfig) -> Self {
        Self {
            enabled: c.enabled,
            down_threshold_minutes: c.down_threshold_minutes,
            cooldown_minutes: c.cooldown_minutes,
            stale_healing_minutes: c.stale_healing_minutes,
        }
    }
}

/// Why a recovery did not trigger this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    Disabled,
    GatewayUp,
    BelowThreshold { down_minutes: i64, threshold: i64 },
    AlreadyHealing,
    CoolingDown { remaining_minutes: i64 },
    NoSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Trigger,
    Blocked(BlockReason),
}

impl Decision {
    pub const fn is_trigger(self) -> bool {
        matches!(self, Self::Trigger)
    }
}

/// All trigger conditions must hold; the first failing one is reported.
pub fn decide(state: &SelfHealState, policy: &HealPolicy, now: DateTime<Utc>, has_snapshot: bool) -> Decision {
    use BlockReason::{AlreadyHealing, BelowThreshold, CoolingDown, Disabled, GatewayUp, NoSnapshot};

    if !policy.enabled {
        return Decision::Blocked(Disabled);
    }
    if state.gateway_down_since.is_none() {
        return Decision::Blocked(GatewayUp);
    }
    if state.gateway_down_minutes < policy.down_threshold_minutes {
        return Decision::Blocked(BelowThreshold {
            down_minutes: state.gateway_down_minutes,
            threshold: policy.down_threshold_minutes,
        });
    }
    if state.healing {
        return Decision::Blocked(AlreadyHealing);
    }
    if let Some(last) = state.last_heal_at {
        let elapsed = now - last;
        let cooldown = minutes_saturating(policy.cooldown_minutes);
        if elapsed < cooldown {
            let remaining = cooldown.checked_sub(&elapsed).map_or(i64::MAX, |d| d.num_minutes());
            return Decision::Blocked(CoolingDown {
                remaining_minutes: remaining.max(1),
            });
        }
    }
    if !has_snapshot {
        return Decision::Blocked(NoSnapshot);
    }
    Decision::Trigger
}
